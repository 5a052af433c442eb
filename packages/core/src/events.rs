//! Events emitted by the submission engine, used for notifications and
//! live subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ApplicationId, BatchId, JobId, UserId};

/// Events emitted by the submission engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SubmissionEvent {
    // Batch events
    /// A batch of applications was queued.
    BatchQueued {
        batch_id: BatchId,
        user_id: UserId,
        application_ids: Vec<ApplicationId>,
        timestamp: DateTime<Utc>,
    },

    // Application events
    /// A worker claimed an application.
    ApplicationClaimed {
        application_id: ApplicationId,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// The external endpoint accepted an application.
    ApplicationSubmitted {
        application_id: ApplicationId,
        user_id: UserId,
        job_id: JobId,
        confirmation_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A processing attempt failed and the application went back to the queue.
    ApplicationRetrying {
        application_id: ApplicationId,
        retry_count: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// An application reached FAILED.
    ApplicationFailed {
        application_id: ApplicationId,
        user_id: UserId,
        job_id: JobId,
        error: String,
        retry_count: u32,
        timestamp: DateTime<Utc>,
    },
    /// An application was withdrawn before it was claimed.
    ApplicationCancelled {
        application_id: ApplicationId,
        user_id: UserId,
        timestamp: DateTime<Utc>,
    },

    // Worker events
    /// A worker began polling.
    WorkerStarted {
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker stopped polling.
    WorkerStopped {
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl SubmissionEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SubmissionEvent::BatchQueued { timestamp, .. }
            | SubmissionEvent::ApplicationClaimed { timestamp, .. }
            | SubmissionEvent::ApplicationSubmitted { timestamp, .. }
            | SubmissionEvent::ApplicationRetrying { timestamp, .. }
            | SubmissionEvent::ApplicationFailed { timestamp, .. }
            | SubmissionEvent::ApplicationCancelled { timestamp, .. }
            | SubmissionEvent::WorkerStarted { timestamp, .. }
            | SubmissionEvent::WorkerStopped { timestamp, .. } => *timestamp,
        }
    }

    /// Get the application ID associated with this event, if any.
    pub fn application_id(&self) -> Option<ApplicationId> {
        match self {
            SubmissionEvent::ApplicationClaimed { application_id, .. }
            | SubmissionEvent::ApplicationSubmitted { application_id, .. }
            | SubmissionEvent::ApplicationRetrying { application_id, .. }
            | SubmissionEvent::ApplicationFailed { application_id, .. }
            | SubmissionEvent::ApplicationCancelled { application_id, .. } => {
                Some(*application_id)
            }
            _ => None,
        }
    }

    /// Check whether the event ends an application's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionEvent::ApplicationSubmitted { .. }
                | SubmissionEvent::ApplicationFailed { .. }
                | SubmissionEvent::ApplicationCancelled { .. }
        )
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            SubmissionEvent::BatchQueued {
                batch_id,
                application_ids,
                ..
            } => format!(
                "Batch {} queued with {} applications",
                batch_id,
                application_ids.len()
            ),
            SubmissionEvent::ApplicationClaimed {
                application_id,
                worker_id,
                ..
            } => format!("Application {} claimed by {}", application_id, worker_id),
            SubmissionEvent::ApplicationSubmitted {
                application_id,
                confirmation_id,
                ..
            } => format!(
                "Application {} submitted ({})",
                application_id, confirmation_id
            ),
            SubmissionEvent::ApplicationRetrying {
                application_id,
                retry_count,
                error,
                ..
            } => format!(
                "Application {} retrying after attempt {}: {}",
                application_id, retry_count, error
            ),
            SubmissionEvent::ApplicationFailed {
                application_id,
                error,
                ..
            } => format!("Application {} failed: {}", application_id, error),
            SubmissionEvent::ApplicationCancelled { application_id, .. } => {
                format!("Application {} cancelled", application_id)
            }
            SubmissionEvent::WorkerStarted { worker_id, .. } => {
                format!("Worker {} started", worker_id)
            }
            SubmissionEvent::WorkerStopped { worker_id, .. } => {
                format!("Worker {} stopped", worker_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_tag() -> Result<(), serde_json::Error> {
        let event = SubmissionEvent::WorkerStarted {
            worker_id: "worker-1".into(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event)?;
        assert_eq!(value["event"], "worker_started");
        assert_eq!(value["worker_id"], "worker-1");
        Ok(())
    }

    #[test]
    fn terminal_events_carry_application() {
        let id = ApplicationId::new();
        let event = SubmissionEvent::ApplicationFailed {
            application_id: id,
            user_id: UserId::new(),
            job_id: JobId::new(),
            error: "boom".into(),
            retry_count: 2,
            timestamp: Utc::now(),
        };
        assert!(event.is_terminal());
        assert_eq!(event.application_id(), Some(id));
        assert!(event.description().contains("boom"));
    }
}
