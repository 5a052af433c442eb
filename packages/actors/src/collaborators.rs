//! Interfaces to the systems a submission depends on.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use db::DbError;
use db::repositories::ApplicationRepository;
use submission_core::{
    ApplicantInfo, Application, ApplicationId, ApplicationStatus, JobId, ResumeDocument,
    StatusUpdate, SubmissionEvent, SubmissionPayload, SubmissionReceipt, UserId,
};
use thiserror::Error;

/// Future type for collaborator calls.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Data assembled for one submission.
#[derive(Debug, Clone)]
pub struct SubmissionContext {
    pub resume: ResumeDocument,
    pub applicant: ApplicantInfo,
    pub cover_letter: Option<String>,
}

/// Missing or unusable submission data. Never retried.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("resume {0} not found")]
    MissingResume(String),
    #[error("applicant profile for user {0} not found")]
    MissingProfile(String),
    #[error("invalid submission data: {0}")]
    Invalid(String),
}

/// Loads resume and applicant data for an application.
pub trait SubmissionContextSource: Send + Sync + 'static {
    fn fetch_context<'a>(
        &'a self,
        application: &'a Application,
    ) -> BoxFuture<'a, Result<SubmissionContext, ContextError>>;
}

/// Outcome classes of the external submission call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    /// Network failure, 5xx, timeout. Retried and counted by the breaker.
    #[error("transient submission failure: {0}")]
    Transient(String),
    /// The endpoint refused the application. Not retried.
    #[error("submission rejected: {0}")]
    Permanent(String),
}

impl SubmissionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmissionError::Transient(_))
    }
}

/// The external endpoint applications are sent to.
pub trait SubmissionClient: Send + Sync + 'static {
    fn submit<'a>(
        &'a self,
        job_id: JobId,
        payload: &'a SubmissionPayload,
    ) -> BoxFuture<'a, Result<SubmissionReceipt, SubmissionError>>;
}

/// Persistence for applications. `persist_status` must refuse transitions the
/// status table forbids.
pub trait ApplicationStore: Send + Sync + 'static {
    fn get(&self, id: ApplicationId) -> BoxFuture<'_, Result<Application, DbError>>;

    fn insert_batch<'a>(
        &'a self,
        applications: &'a [Application],
    ) -> BoxFuture<'a, Result<(), DbError>>;

    fn persist_status(
        &self,
        id: ApplicationId,
        to: ApplicationStatus,
        update: StatusUpdate,
    ) -> BoxFuture<'_, Result<Application, DbError>>;
}

impl ApplicationStore for ApplicationRepository {
    fn get(&self, id: ApplicationId) -> BoxFuture<'_, Result<Application, DbError>> {
        Box::pin(ApplicationRepository::get(id))
    }

    fn insert_batch<'a>(
        &'a self,
        applications: &'a [Application],
    ) -> BoxFuture<'a, Result<(), DbError>> {
        Box::pin(ApplicationRepository::insert_batch(applications))
    }

    fn persist_status(
        &self,
        id: ApplicationId,
        to: ApplicationStatus,
        update: StatusUpdate,
    ) -> BoxFuture<'_, Result<Application, DbError>> {
        Box::pin(ApplicationRepository::persist_status(id, to, update))
    }
}

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Fire-and-forget user notifications.
pub trait Notifier: Send + Sync + 'static {
    fn notify<'a>(
        &'a self,
        user_id: UserId,
        event: &'a SubmissionEvent,
    ) -> BoxFuture<'a, Result<(), NotifyError>>;
}

/// The collaborators a worker or supervisor is wired with.
#[derive(Clone)]
pub struct Collaborators {
    pub applications: Arc<dyn ApplicationStore>,
    pub context: Arc<dyn SubmissionContextSource>,
    pub client: Arc<dyn SubmissionClient>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// Send a notification, logging instead of failing.
    pub async fn notify(&self, user_id: UserId, event: &SubmissionEvent) {
        if let Err(err) = self.notifier.notify(user_id, event).await {
            tracing::warn!(
                user_id = %user_id,
                event = %event.description(),
                error = %err,
                "Notification failed"
            );
        }
    }
}
