//! The tracked application entity whose lifecycle the worker drives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ApplicationId, ApplicationStatus, BatchId, JobId, QueueItem, ResumeId, UserId};

/// An application of one resume to one job posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    /// Unique identifier, shared with the queue item.
    pub id: ApplicationId,
    pub user_id: UserId,
    pub job_id: JobId,
    pub resume_id: ResumeId,
    /// The batch request this application was created from.
    pub batch_id: BatchId,
    pub status: ApplicationStatus,
    /// Failed processing attempts so far. Never decreases.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_letter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    /// Reference returned by the external endpoint on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_id: Option<String>,
    /// Last failure, surfaced to the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// Create a new pending application.
    pub fn new(user_id: UserId, job_id: JobId, resume_id: ResumeId, batch_id: BatchId) -> Self {
        let now = Utc::now();
        Self {
            id: ApplicationId::new(),
            user_id,
            job_id,
            resume_id,
            batch_id,
            status: ApplicationStatus::Pending,
            retry_count: 0,
            cover_letter: None,
            submitted_at: None,
            confirmation_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a cover letter.
    pub fn with_cover_letter(mut self, cover_letter: impl Into<String>) -> Self {
        self.cover_letter = Some(cover_letter.into());
        self
    }

    /// Build the queue item that carries this application through the worklist.
    pub fn queue_item(&self) -> QueueItem {
        QueueItem {
            application_id: self.id,
            user_id: self.user_id,
            job_id: self.job_id,
            resume_id: self.resume_id,
            queued_at: Utc::now(),
        }
    }

    /// Apply a status change and its accompanying fields in memory.
    ///
    /// Callers validate the transition first; this only copies values.
    pub fn apply(&mut self, status: ApplicationStatus, update: &StatusUpdate) {
        self.status = status;
        if let Some(retry_count) = update.retry_count {
            self.retry_count = retry_count;
        }
        if let Some(confirmation_id) = &update.confirmation_id {
            self.confirmation_id = Some(confirmation_id.clone());
        }
        if let Some(submitted_at) = update.submitted_at {
            self.submitted_at = Some(submitted_at);
        }
        if let Some(error_message) = &update.error_message {
            self.error_message = Some(error_message.clone());
        }
        self.updated_at = Utc::now();
    }
}

/// Extra fields persisted alongside a status change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StatusUpdate {
    /// Fields for a successful submission.
    pub fn submitted(confirmation_id: impl Into<String>) -> Self {
        Self {
            confirmation_id: Some(confirmation_id.into()),
            submitted_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Fields for a failed attempt.
    pub fn failed(retry_count: u32, error_message: impl Into<String>) -> Self {
        Self {
            retry_count: Some(retry_count),
            error_message: Some(error_message.into()),
            ..Default::default()
        }
    }

    /// Fields for a permanent failure that does not count as a retry.
    pub fn error(error_message: impl Into<String>) -> Self {
        Self {
            error_message: Some(error_message.into()),
            ..Default::default()
        }
    }
}
