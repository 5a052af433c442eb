//! Worklist entries and the batch request that produces them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Application, ApplicationId, BatchId, JobId, ResumeId, UserId};

/// One entry of the shared worklist. Identity is `application_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub application_id: ApplicationId,
    pub user_id: UserId,
    pub job_id: JobId,
    pub resume_id: ResumeId,
    /// When the item was (re)appended to the worklist.
    pub queued_at: DateTime<Utc>,
}

impl QueueItem {
    /// Copy of this item stamped with the current time, for re-appending.
    pub fn refreshed(&self) -> Self {
        Self {
            queued_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// A request to apply one resume to several jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub resume_id: ResumeId,
    pub job_ids: Vec<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_letter: Option<String>,
}

impl BatchRequest {
    pub fn new(resume_id: ResumeId, job_ids: Vec<JobId>) -> Self {
        Self {
            resume_id,
            job_ids,
            cover_letter: None,
        }
    }

    /// Attach a cover letter shared by every application in the batch.
    pub fn with_cover_letter(mut self, cover_letter: impl Into<String>) -> Self {
        self.cover_letter = Some(cover_letter.into());
        self
    }

    /// Create one pending application per job id, all sharing `batch_id`.
    pub fn into_applications(self, user_id: UserId, batch_id: BatchId) -> Vec<Application> {
        let BatchRequest {
            resume_id,
            job_ids,
            cover_letter,
        } = self;

        job_ids
            .into_iter()
            .map(|job_id| {
                let app = Application::new(user_id, job_id, resume_id, batch_id);
                match &cover_letter {
                    Some(letter) => app.with_cover_letter(letter.clone()),
                    None => app,
                }
            })
            .collect()
    }
}

/// Result of accepting a batch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationBatch {
    pub batch_id: BatchId,
    pub application_ids: Vec<ApplicationId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_produces_one_application_per_job() {
        let user = UserId::new();
        let batch = BatchId::new();
        let jobs = vec![JobId::new(), JobId::new(), JobId::new()];
        let request = BatchRequest::new(ResumeId::new(), jobs.clone()).with_cover_letter("Hi");

        let apps = request.into_applications(user, batch);

        assert_eq!(apps.len(), 3);
        for (app, job) in apps.iter().zip(&jobs) {
            assert_eq!(app.job_id, *job);
            assert_eq!(app.user_id, user);
            assert_eq!(app.batch_id, batch);
            assert_eq!(app.cover_letter.as_deref(), Some("Hi"));
        }
    }

    #[test]
    fn refreshed_item_keeps_identity() {
        let item = QueueItem {
            application_id: ApplicationId::new(),
            user_id: UserId::new(),
            job_id: JobId::new(),
            resume_id: ResumeId::new(),
            queued_at: DateTime::<Utc>::MIN_UTC,
        };
        let refreshed = item.refreshed();
        assert_eq!(refreshed.application_id, item.application_id);
        assert!(refreshed.queued_at > item.queued_at);
    }
}
