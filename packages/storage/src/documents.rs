//! Resume and profile layout.
//!
//! - `resumes/{user_id}/{resume_id}`: the resume file
//! - `resumes/{user_id}/{resume_id}.meta.json`: its file name and content type
//! - `profiles/{user_id}.json`: the applicant profile

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use submission_core::{ApplicantInfo, ResumeDocument, ResumeId, UserId};

use crate::{Storage, StorageError};

/// Sidecar describing a stored resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeMetadata {
    pub file_name: String,
    pub content_type: String,
}

impl ResumeMetadata {
    fn fallback(resume_id: ResumeId) -> Self {
        Self {
            file_name: format!("resume-{resume_id}.pdf"),
            content_type: "application/pdf".to_string(),
        }
    }
}

/// Typed access to the documents a submission is built from.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    storage: Storage,
}

impl DocumentStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn resume_key(user_id: UserId, resume_id: ResumeId) -> String {
        format!("resumes/{user_id}/{resume_id}")
    }

    fn resume_meta_key(user_id: UserId, resume_id: ResumeId) -> String {
        format!("resumes/{user_id}/{resume_id}.meta.json")
    }

    fn profile_key(user_id: UserId) -> String {
        format!("profiles/{user_id}.json")
    }

    pub async fn put_resume(
        &self,
        user_id: UserId,
        resume_id: ResumeId,
        resume: &ResumeDocument,
    ) -> Result<(), StorageError> {
        self.storage
            .put_bytes(
                &Self::resume_key(user_id, resume_id),
                Bytes::from(resume.bytes.clone()),
            )
            .await?;
        let meta = ResumeMetadata {
            file_name: resume.file_name.clone(),
            content_type: resume.content_type.clone(),
        };
        self.storage
            .put_json(&Self::resume_meta_key(user_id, resume_id), &meta)
            .await
    }

    /// Load a resume. A missing sidecar falls back to a PDF named after the id.
    pub async fn get_resume(
        &self,
        user_id: UserId,
        resume_id: ResumeId,
    ) -> Result<ResumeDocument, StorageError> {
        let bytes = self
            .storage
            .get_bytes(&Self::resume_key(user_id, resume_id))
            .await?;

        let meta = match self
            .storage
            .get_json::<ResumeMetadata>(&Self::resume_meta_key(user_id, resume_id))
            .await
        {
            Ok(meta) => meta,
            Err(err) if err.is_not_found() => ResumeMetadata::fallback(resume_id),
            Err(err) => return Err(err),
        };

        Ok(ResumeDocument {
            file_name: meta.file_name,
            content_type: meta.content_type,
            bytes: bytes.to_vec(),
        })
    }

    pub async fn delete_resume(
        &self,
        user_id: UserId,
        resume_id: ResumeId,
    ) -> Result<(), StorageError> {
        self.storage
            .delete(&Self::resume_key(user_id, resume_id))
            .await?;
        match self
            .storage
            .delete(&Self::resume_meta_key(user_id, resume_id))
            .await
        {
            Err(err) if !err.is_not_found() => Err(err),
            _ => Ok(()),
        }
    }

    pub async fn put_profile(
        &self,
        user_id: UserId,
        profile: &ApplicantInfo,
    ) -> Result<(), StorageError> {
        self.storage
            .put_json(&Self::profile_key(user_id), profile)
            .await
    }

    pub async fn get_profile(&self, user_id: UserId) -> Result<ApplicantInfo, StorageError> {
        self.storage.get_json(&Self::profile_key(user_id)).await
    }
}
