//! Submission data loaded from the document store.

use actors::{BoxFuture, ContextError, SubmissionContext, SubmissionContextSource};
use storage::{DocumentStore, StorageError};
use submission_core::Application;

/// Reads the resume and applicant profile for an application.
#[derive(Debug, Clone)]
pub struct DocumentContextSource {
    documents: DocumentStore,
}

impl DocumentContextSource {
    pub fn new(documents: DocumentStore) -> Self {
        Self { documents }
    }

    async fn load(&self, application: &Application) -> Result<SubmissionContext, ContextError> {
        let resume = self
            .documents
            .get_resume(application.user_id, application.resume_id)
            .await
            .map_err(|e| match e {
                StorageError::NotFound { .. } => {
                    ContextError::MissingResume(application.resume_id.to_string())
                }
                other => ContextError::Invalid(format!("resume: {other}")),
            })?;

        let applicant = self
            .documents
            .get_profile(application.user_id)
            .await
            .map_err(|e| match e {
                StorageError::NotFound { .. } => {
                    ContextError::MissingProfile(application.user_id.to_string())
                }
                other => ContextError::Invalid(format!("profile: {other}")),
            })?;

        if applicant.email.trim().is_empty() {
            return Err(ContextError::Invalid("profile has no email".into()));
        }

        Ok(SubmissionContext {
            resume,
            applicant,
            cover_letter: None,
        })
    }
}

impl SubmissionContextSource for DocumentContextSource {
    fn fetch_context<'a>(
        &'a self,
        application: &'a Application,
    ) -> BoxFuture<'a, Result<SubmissionContext, ContextError>> {
        Box::pin(self.load(application))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use storage::{Storage, StorageConfig};
    use submission_core::{ApplicantInfo, BatchId, JobId, ResumeDocument, ResumeId, UserId};

    async fn source() -> (DocumentContextSource, DocumentStore) {
        let documents = DocumentStore::new(Storage::new(StorageConfig::memory()).await.unwrap());
        (DocumentContextSource::new(documents.clone()), documents)
    }

    fn application() -> Application {
        Application::new(UserId::new(), JobId::new(), ResumeId::new(), BatchId::new())
    }

    fn profile(email: &str) -> ApplicantInfo {
        ApplicantInfo {
            full_name: "Sam Rivera".into(),
            email: email.into(),
            phone: Some("+1 555 0100".into()),
            location: None,
            links: vec!["https://example.com/sam".into()],
        }
    }

    #[tokio::test]
    async fn loads_resume_and_profile() {
        let (source, documents) = source().await;
        let app = application();
        let resume = ResumeDocument {
            file_name: "sam.pdf".into(),
            content_type: "application/pdf".into(),
            bytes: b"%PDF-1.7".to_vec(),
        };
        documents
            .put_resume(app.user_id, app.resume_id, &resume)
            .await
            .unwrap();
        documents
            .put_profile(app.user_id, &profile("sam@example.com"))
            .await
            .unwrap();

        let context = source.fetch_context(&app).await.unwrap();
        assert_eq!(context.resume, resume);
        assert_eq!(context.applicant.email, "sam@example.com");
        assert!(context.cover_letter.is_none());
    }

    #[tokio::test]
    async fn missing_resume_is_reported() {
        let (source, documents) = source().await;
        let app = application();
        documents
            .put_profile(app.user_id, &profile("sam@example.com"))
            .await
            .unwrap();

        let err = source.fetch_context(&app).await.unwrap_err();
        assert!(matches!(err, ContextError::MissingResume(id) if id == app.resume_id.to_string()));
    }

    #[tokio::test]
    async fn missing_or_incomplete_profile_is_reported() {
        let (source, documents) = source().await;
        let app = application();
        let resume = ResumeDocument {
            file_name: "sam.pdf".into(),
            content_type: "application/pdf".into(),
            bytes: b"%PDF-1.7".to_vec(),
        };
        documents
            .put_resume(app.user_id, app.resume_id, &resume)
            .await
            .unwrap();

        let err = source.fetch_context(&app).await.unwrap_err();
        assert!(matches!(err, ContextError::MissingProfile(_)));

        documents
            .put_profile(app.user_id, &profile("  "))
            .await
            .unwrap();
        let err = source.fetch_context(&app).await.unwrap_err();
        assert!(matches!(err, ContextError::Invalid(_)));
    }
}
