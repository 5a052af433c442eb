//! Data sent to the external submission endpoint.

use serde::{Deserialize, Serialize};

use crate::{ApplicationId, JobId};

/// Applicant details taken from the user's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicantInfo {
    pub full_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
}

/// A resume file ready for upload.
#[derive(Clone, PartialEq, Eq)]
pub struct ResumeDocument {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ResumeDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumeDocument")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Everything the endpoint needs for one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionPayload {
    pub application_id: ApplicationId,
    pub job_id: JobId,
    pub applicant: ApplicantInfo,
    pub resume: ResumeDocument,
    pub cover_letter: Option<String>,
}

/// Successful response from the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub confirmation_id: String,
}
