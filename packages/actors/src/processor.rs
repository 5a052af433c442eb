//! One polling cycle of a submission worker.
//!
//! A cycle claims one item, moves its application PENDING -> PROCESSING,
//! loads the submission data, sends it through the circuit breaker and retry
//! executor, records the result, and always gives the claim back: either by
//! releasing the leases or, for a retry, by requeueing the item. User
//! notifications go out only after the claim is given back.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use db::DbError;
use futures_util::FutureExt;
use resilience::{CircuitBreaker, CircuitBreakerError, RetryConfig, with_retry_when};
use submission_core::{
    Application, ApplicationId, ApplicationStatus, QueueItem, StatusUpdate, SubmissionEvent,
    SubmissionPayload, UserId,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::collaborators::{Collaborators, SubmissionError};
use crate::queue::SubmissionQueue;

/// What a cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing eligible in the scan window.
    Idle,
    Submitted {
        application_id: ApplicationId,
        confirmation_id: String,
    },
    /// A retryable failure sent the item back to the worklist.
    Requeued {
        application_id: ApplicationId,
        retry_count: u32,
    },
    /// The application reached FAILED.
    Failed {
        application_id: ApplicationId,
        error: String,
    },
    /// The claim did not match a PENDING application and was dropped.
    Skipped {
        application_id: ApplicationId,
        reason: String,
    },
    /// The application could not be read or claimed; the item went back
    /// untouched.
    Deferred {
        application_id: ApplicationId,
        error: String,
    },
    /// The attempt finished but its status could not be written. The item
    /// went back and the next claim settles the application.
    Unrecorded {
        application_id: ApplicationId,
        error: String,
    },
    /// The shared store could not be reached.
    StoreUnavailable { error: String },
}

impl CycleOutcome {
    fn returns_item(&self) -> bool {
        matches!(
            self,
            CycleOutcome::Requeued { .. }
                | CycleOutcome::Deferred { .. }
                | CycleOutcome::Unrecorded { .. }
        )
    }
}

/// Notifications held back until the claim is released.
type Notices = Vec<(UserId, SubmissionEvent)>;

/// Bounds retries of a single status write.
fn status_retry() -> RetryConfig {
    RetryConfig::new(3, 50, 1_000)
}

/// Runs cycles for one worker.
pub struct SubmissionProcessor {
    worker_id: String,
    queue: SubmissionQueue,
    collaborators: Collaborators,
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
    max_retries: u32,
    events: Option<broadcast::Sender<SubmissionEvent>>,
}

impl SubmissionProcessor {
    /// `max_retries` bounds processing attempts; `retry` bounds calls within one attempt.
    pub fn new(
        worker_id: impl Into<String>,
        queue: SubmissionQueue,
        collaborators: Collaborators,
        breaker: Arc<CircuitBreaker>,
        retry: RetryConfig,
        max_retries: u32,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue,
            collaborators,
            breaker,
            retry,
            max_retries,
            events: None,
        }
    }

    /// Broadcast events to live subscribers as well as the notifier.
    pub fn with_events(mut self, events: broadcast::Sender<SubmissionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run one cycle. Never fails: every error ends up in the outcome.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let item = match self.queue.dequeue(&self.worker_id).await {
            Ok(Some(item)) => item,
            Ok(None) => return CycleOutcome::Idle,
            Err(err) => {
                warn!(worker_id = %self.worker_id, error = %err, "Dequeue failed");
                return CycleOutcome::StoreUnavailable {
                    error: err.to_string(),
                };
            }
        };

        self.broadcast(SubmissionEvent::ApplicationClaimed {
            application_id: item.application_id,
            worker_id: self.worker_id.clone(),
            timestamp: Utc::now(),
        });

        let mut notices = Notices::new();
        let outcome = match AssertUnwindSafe(self.process(&item, &mut notices))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                error!(
                    worker_id = %self.worker_id,
                    application_id = %item.application_id,
                    panic_msg = %panic_msg,
                    "Cycle panicked"
                );
                self.recover_from_panic(&item, panic_msg, &mut notices)
                    .await
            }
        };

        self.cleanup(&item, &outcome).await;
        for (user_id, event) in notices {
            self.collaborators.notify(user_id, &event).await;
            self.broadcast(event);
        }
        outcome
    }

    async fn process(&self, item: &QueueItem, notices: &mut Notices) -> CycleOutcome {
        let application_id = item.application_id;
        let applications = &self.collaborators.applications;

        let application = match applications.get(application_id).await {
            Ok(application) => application,
            Err(DbError::NotFound(_)) => {
                warn!(application_id = %application_id, "Claimed item has no application");
                return CycleOutcome::Skipped {
                    application_id,
                    reason: "application not found".into(),
                };
            }
            Err(err) => {
                return CycleOutcome::Deferred {
                    application_id,
                    error: err.to_string(),
                };
            }
        };

        match application.status {
            ApplicationStatus::Pending => {}
            ApplicationStatus::Processing => {
                // Only an unrecorded attempt puts a PROCESSING item back.
                warn!(
                    application_id = %application_id,
                    retry_count = application.retry_count,
                    "Settling an attempt whose outcome was never recorded"
                );
                return self
                    .retry_or_fail(
                        &application,
                        "previous attempt ended without a recorded outcome".into(),
                        notices,
                    )
                    .await;
            }
            status => {
                warn!(
                    application_id = %application_id,
                    status = %status,
                    "Stale or duplicate claim"
                );
                return CycleOutcome::Skipped {
                    application_id,
                    reason: format!("application is {status}"),
                };
            }
        }

        let application = match self
            .persist(
                application_id,
                ApplicationStatus::Processing,
                StatusUpdate::default(),
            )
            .await
        {
            Ok(application) => application,
            Err(err @ (DbError::StaleStatus { .. } | DbError::InvalidTransition(_))) => {
                warn!(application_id = %application_id, error = %err, "Claim lost to a status change");
                return CycleOutcome::Skipped {
                    application_id,
                    reason: err.to_string(),
                };
            }
            Err(err) => {
                return CycleOutcome::Deferred {
                    application_id,
                    error: err.to_string(),
                };
            }
        };

        let context = match self.collaborators.context.fetch_context(&application).await {
            Ok(context) => context,
            Err(err) => {
                return self
                    .fail(
                        &application,
                        format!("Failed to load submission data: {err}"),
                        notices,
                    )
                    .await;
            }
        };

        let payload = SubmissionPayload {
            application_id,
            job_id: application.job_id,
            applicant: context.applicant,
            resume: context.resume,
            cover_letter: context.cover_letter.or_else(|| application.cover_letter.clone()),
        };

        // Rejections are answered inside the breaker so only transient
        // failures count against the circuit.
        let client = &self.collaborators.client;
        let result = self
            .breaker
            .call(|| async {
                let attempt = with_retry_when(&self.retry, SubmissionError::is_retryable, || {
                    client.submit(application.job_id, &payload)
                })
                .await;
                match attempt.into_result() {
                    Ok(receipt) => Ok(Ok(receipt)),
                    Err(SubmissionError::Permanent(reason)) => Ok(Err(reason)),
                    Err(err) => Err(err),
                }
            })
            .await;

        match result {
            Ok(Ok(receipt)) => {
                self.succeed(&application, receipt.confirmation_id, notices)
                    .await
            }
            Ok(Err(reason)) => {
                self.fail(&application, format!("Submission rejected: {reason}"), notices)
                    .await
            }
            Err(CircuitBreakerError::OperationFailed(err)) => {
                self.retry_or_fail(&application, err.to_string(), notices)
                    .await
            }
            Err(err @ CircuitBreakerError::CircuitOpen { .. }) => {
                self.retry_or_fail(&application, err.to_string(), notices)
                    .await
            }
        }
    }

    async fn succeed(
        &self,
        application: &Application,
        confirmation_id: String,
        notices: &mut Notices,
    ) -> CycleOutcome {
        let update = StatusUpdate::submitted(confirmation_id.clone());
        let submitted_at = update.submitted_at.unwrap_or_else(Utc::now);

        if let Err(err) = self
            .persist(application.id, ApplicationStatus::Submitted, update)
            .await
        {
            // The endpoint accepted it; retrying would submit twice.
            error!(
                application_id = %application.id,
                confirmation_id = %confirmation_id,
                error = %err,
                "Submitted but status could not be recorded"
            );
        }

        info!(
            application_id = %application.id,
            confirmation_id = %confirmation_id,
            "Application submitted"
        );
        notices.push((
            application.user_id,
            SubmissionEvent::ApplicationSubmitted {
                application_id: application.id,
                user_id: application.user_id,
                job_id: application.job_id,
                confirmation_id: confirmation_id.clone(),
                timestamp: submitted_at,
            },
        ));

        CycleOutcome::Submitted {
            application_id: application.id,
            confirmation_id,
        }
    }

    /// Permanent failure: FAILED without consuming a retry.
    async fn fail(
        &self,
        application: &Application,
        message: String,
        notices: &mut Notices,
    ) -> CycleOutcome {
        self.mark_failed(
            application,
            StatusUpdate::error(message.clone()),
            &message,
            notices,
        )
        .await
    }

    async fn retry_or_fail(
        &self,
        application: &Application,
        error: String,
        notices: &mut Notices,
    ) -> CycleOutcome {
        let retry_count = application.retry_count + 1;

        if retry_count < self.max_retries {
            if let Err(err) = self
                .persist(
                    application.id,
                    ApplicationStatus::Pending,
                    StatusUpdate::failed(retry_count, error.clone()),
                )
                .await
            {
                return self.unrecorded(application, ApplicationStatus::Pending, err);
            }

            warn!(
                application_id = %application.id,
                retry_count,
                error = %error,
                "Attempt failed, requeueing"
            );
            self.broadcast(SubmissionEvent::ApplicationRetrying {
                application_id: application.id,
                retry_count,
                error,
                timestamp: Utc::now(),
            });

            return CycleOutcome::Requeued {
                application_id: application.id,
                retry_count,
            };
        }

        let message = format!("Failed after {retry_count} attempts: {error}");
        self.mark_failed(
            application,
            StatusUpdate::failed(retry_count, message.clone()),
            &message,
            notices,
        )
        .await
    }

    async fn mark_failed(
        &self,
        application: &Application,
        update: StatusUpdate,
        message: &str,
        notices: &mut Notices,
    ) -> CycleOutcome {
        let retry_count = update.retry_count.unwrap_or(application.retry_count);

        if let Err(err) = self
            .persist(application.id, ApplicationStatus::Failed, update)
            .await
        {
            return self.unrecorded(application, ApplicationStatus::Failed, err);
        }

        warn!(application_id = %application.id, error = %message, "Application failed");
        notices.push((
            application.user_id,
            SubmissionEvent::ApplicationFailed {
                application_id: application.id,
                user_id: application.user_id,
                job_id: application.job_id,
                error: message.to_string(),
                retry_count,
                timestamp: Utc::now(),
            },
        ));

        CycleOutcome::Failed {
            application_id: application.id,
            error: message.to_string(),
        }
    }

    /// The item goes back with the application left in PROCESSING.
    fn unrecorded(
        &self,
        application: &Application,
        target: ApplicationStatus,
        err: DbError,
    ) -> CycleOutcome {
        error!(
            application_id = %application.id,
            target = %target,
            error = %err,
            "Could not record attempt outcome"
        );
        CycleOutcome::Unrecorded {
            application_id: application.id,
            error: err.to_string(),
        }
    }

    /// Write a status change, retrying store faults.
    async fn persist(
        &self,
        id: ApplicationId,
        to: ApplicationStatus,
        update: StatusUpdate,
    ) -> Result<Application, DbError> {
        let applications = &self.collaborators.applications;
        let outcome = with_retry_when(&status_retry(), DbError::is_retryable, || {
            applications.persist_status(id, to, update.clone())
        })
        .await;
        if outcome.attempts > 1 {
            debug!(application_id = %id, attempts = outcome.attempts, "Status write retried");
        }
        outcome.into_result()
    }

    /// Treat a panic as a retryable failure of whatever stage it hit.
    async fn recover_from_panic(
        &self,
        item: &QueueItem,
        panic_msg: String,
        notices: &mut Notices,
    ) -> CycleOutcome {
        let application_id = item.application_id;
        match self.collaborators.applications.get(application_id).await {
            Ok(application) if application.status == ApplicationStatus::Processing => {
                self.retry_or_fail(&application, format!("worker panicked: {panic_msg}"), notices)
                    .await
            }
            Ok(application) if application.status == ApplicationStatus::Pending => {
                CycleOutcome::Deferred {
                    application_id,
                    error: format!("worker panicked: {panic_msg}"),
                }
            }
            Ok(application) => CycleOutcome::Skipped {
                application_id,
                reason: format!("application is {}", application.status),
            },
            Err(err) => CycleOutcome::Deferred {
                application_id,
                error: err.to_string(),
            },
        }
    }

    async fn cleanup(&self, item: &QueueItem, outcome: &CycleOutcome) {
        let result = if outcome.returns_item() {
            self.queue.requeue(item).await
        } else {
            self.queue
                .release_lock(item.application_id, item.user_id)
                .await
        };

        match result {
            Ok(()) => debug!(application_id = %item.application_id, "Claim released"),
            Err(err) => error!(
                application_id = %item.application_id,
                error = %err,
                "Failed to release claim"
            ),
        }
    }

    fn broadcast(&self, event: SubmissionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}
