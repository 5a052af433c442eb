//! Application repository: creation, lookup and guarded status changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use submission_core::{
    Application, ApplicationId, ApplicationStatus, BatchId, JobId, ResumeId, StatusUpdate, UserId,
    ensure_transition,
};

use crate::{DbError, get_db};

/// Repository for application persistence operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplicationRepository;

/// Stored shape of an application. The record id carries the same value as
/// `application_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApplicationRecord {
    application_id: ApplicationId,
    user_id: UserId,
    job_id: JobId,
    resume_id: ResumeId,
    batch_id: BatchId,
    status: ApplicationStatus,
    retry_count: u32,
    cover_letter: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
    confirmation_id: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Application> for ApplicationRecord {
    fn from(app: &Application) -> Self {
        Self {
            application_id: app.id,
            user_id: app.user_id,
            job_id: app.job_id,
            resume_id: app.resume_id,
            batch_id: app.batch_id,
            status: app.status,
            retry_count: app.retry_count,
            cover_letter: app.cover_letter.clone(),
            submitted_at: app.submitted_at,
            confirmation_id: app.confirmation_id.clone(),
            error_message: app.error_message.clone(),
            created_at: app.created_at,
            updated_at: app.updated_at,
        }
    }
}

impl From<ApplicationRecord> for Application {
    fn from(record: ApplicationRecord) -> Self {
        Self {
            id: record.application_id,
            user_id: record.user_id,
            job_id: record.job_id,
            resume_id: record.resume_id,
            batch_id: record.batch_id,
            status: record.status,
            retry_count: record.retry_count,
            cover_letter: record.cover_letter,
            submitted_at: record.submitted_at,
            confirmation_id: record.confirmation_id,
            error_message: record.error_message,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

impl ApplicationRepository {
    /// Persist new applications. Fails if any id already exists.
    pub async fn insert_batch(applications: &[Application]) -> Result<(), DbError> {
        let db = get_db()?;

        for app in applications {
            db.query("CREATE type::thing('application', $id) CONTENT $record")
                .bind(("id", app.id.to_string()))
                .bind(("record", ApplicationRecord::from(app)))
                .await?
                .check()?;
        }

        tracing::debug!(count = applications.len(), "Applications created");
        Ok(())
    }

    /// Get an application by ID.
    pub async fn get(id: ApplicationId) -> Result<Application, DbError> {
        let db = get_db()?;

        let mut response = db
            .query("SELECT * FROM type::thing('application', $id)")
            .bind(("id", id.to_string()))
            .await?
            .check()?;
        let records: Vec<ApplicationRecord> = response.take(0)?;

        records
            .into_iter()
            .next()
            .map(Application::from)
            .ok_or_else(|| DbError::NotFound(format!("Application not found: {}", id)))
    }

    /// List the applications created from one batch request.
    pub async fn list_by_batch(batch_id: BatchId) -> Result<Vec<Application>, DbError> {
        Self::list_where("batch_id", batch_id.to_string()).await
    }

    /// List a user's applications, oldest first.
    pub async fn list_by_user(user_id: UserId) -> Result<Vec<Application>, DbError> {
        Self::list_where("user_id", user_id.to_string()).await
    }

    async fn list_where(field: &str, value: String) -> Result<Vec<Application>, DbError> {
        let db = get_db()?;

        let query = format!(
            "SELECT * FROM application WHERE {} = $value ORDER BY created_at ASC",
            field
        );
        let mut response = db.query(query).bind(("value", value)).await?.check()?;
        let records: Vec<ApplicationRecord> = response.take(0)?;

        Ok(records.into_iter().map(Application::from).collect())
    }

    /// Move an application to `to`, recording `update` alongside.
    ///
    /// Rejects transitions the status table forbids and any decrease of the
    /// retry count. The write only applies if the stored status is still the
    /// one validated against, otherwise [`DbError::StaleStatus`].
    pub async fn persist_status(
        id: ApplicationId,
        to: ApplicationStatus,
        update: StatusUpdate,
    ) -> Result<Application, DbError> {
        let db = get_db()?;
        let current = Self::get(id).await?;

        ensure_transition(current.status, to)?;

        if let Some(requested) = update.retry_count {
            if requested < current.retry_count {
                return Err(DbError::RetryCountDecreased {
                    id: id.to_string(),
                    current: current.retry_count,
                    requested,
                });
            }
        }

        let from = current.status;
        let mut next = current;
        next.apply(to, &update);

        let mut response = db
            .query(
                "UPDATE type::thing('application', $id) CONTENT $record \
                 WHERE status = $from RETURN AFTER",
            )
            .bind(("id", id.to_string()))
            .bind(("record", ApplicationRecord::from(&next)))
            .bind(("from", from.as_str().to_string()))
            .await?
            .check()?;
        let records: Vec<ApplicationRecord> = response.take(0)?;

        let updated = records
            .into_iter()
            .next()
            .map(Application::from)
            .ok_or_else(|| DbError::StaleStatus {
                id: id.to_string(),
                expected: from.to_string(),
            })?;

        tracing::debug!(
            application_id = %id,
            from = %from,
            to = %to,
            retry_count = updated.retry_count,
            "Application status persisted"
        );
        Ok(updated)
    }
}
