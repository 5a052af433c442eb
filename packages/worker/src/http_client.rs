//! HTTP adapter for the external submission endpoint.
//!
//! Each application is posted as `multipart/form-data` to
//! `{base_url}/jobs/{job_id}/applications` with three parts: the resume file,
//! the applicant profile as JSON, and the optional cover letter.

use std::time::Duration;

use actors::{BoxFuture, SubmissionClient, SubmissionError};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use submission_core::env::{self, parse_var, string_var};
use submission_core::{ConfigError, JobId, SubmissionPayload, SubmissionReceipt};
use tracing::{debug, info, warn};

/// Configuration for the submission endpoint client.
#[derive(Clone)]
pub struct HttpClientConfig {
    /// Base URL of the endpoint (e.g., "<https://jobs.example.com/api>")
    pub base_url: String,
    /// Bearer token sent with every request
    pub token: Option<String>,
    /// Request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for HttpClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClientConfig")
            .field("base_url", &self.base_url)
            .field("token_set", &self.token.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            token: None,
            timeout: Duration::from_millis(30_000),
        }
    }
}

impl HttpClientConfig {
    /// - `SUBMISSION_ENDPOINT_URL`
    /// - `SUBMISSION_ENDPOINT_TOKEN`
    /// - `SUBMISSION_ENDPOINT_TIMEOUT_MS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env::process_env)
    }

    pub fn from_lookup<L>(lookup: &L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let base_url = string_var(lookup, "SUBMISSION_ENDPOINT_URL").unwrap_or(defaults.base_url);
        Url::parse(&base_url).map_err(|e| {
            ConfigError::invalid("SUBMISSION_ENDPOINT_URL", base_url.clone(), e.to_string())
        })?;

        let timeout_ms: u64 = parse_var(lookup, "SUBMISSION_ENDPOINT_TIMEOUT_MS")?
            .unwrap_or(defaults.timeout.as_millis() as u64);
        if timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "SUBMISSION_ENDPOINT_TIMEOUT_MS",
                "0",
                "must be at least 1",
            ));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: string_var(lookup, "SUBMISSION_ENDPOINT_TOKEN"),
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

/// Errors creating the client.
#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to create HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Body of a 2xx response.
#[derive(Debug, Default, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default, alias = "confirmationId")]
    confirmation_id: Option<String>,
    #[serde(default, alias = "errorMessage")]
    error_message: Option<String>,
}

/// [`SubmissionClient`] over HTTP.
pub struct HttpSubmissionClient {
    client: Client,
    config: HttpClientConfig,
}

impl std::fmt::Debug for HttpSubmissionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSubmissionClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HttpSubmissionClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, HttpClientError> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .user_agent(format!("submission-worker/{}", env!("CARGO_PKG_VERSION")));

        if let Some(ref token) = config.token {
            let mut value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| {
                    ConfigError::invalid("SUBMISSION_ENDPOINT_TOKEN", "<redacted>", e.to_string())
                })?;
            value.set_sensitive(true);
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        let client = builder.build()?;
        info!(
            base_url = %config.base_url,
            timeout_ms = config.timeout.as_millis() as u64,
            "Created submission client"
        );
        Ok(Self { client, config })
    }

    fn endpoint(&self, job_id: JobId) -> String {
        format!("{}/jobs/{}/applications", self.config.base_url, job_id)
    }

    async fn send(
        &self,
        job_id: JobId,
        payload: &SubmissionPayload,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        let form = build_form(payload)?;
        let url = self.endpoint(job_id);
        debug!(url = %url, application_id = %payload.application_id, "Posting application");

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }
        parse_receipt(&body, payload)
    }
}

impl SubmissionClient for HttpSubmissionClient {
    fn submit<'a>(
        &'a self,
        job_id: JobId,
        payload: &'a SubmissionPayload,
    ) -> BoxFuture<'a, Result<SubmissionReceipt, SubmissionError>> {
        Box::pin(self.send(job_id, payload))
    }
}

fn build_form(payload: &SubmissionPayload) -> Result<Form, SubmissionError> {
    let applicant = serde_json::to_string(&payload.applicant)
        .map_err(|e| SubmissionError::Permanent(format!("applicant is not serializable: {e}")))?;

    let resume = Part::bytes(payload.resume.bytes.clone())
        .file_name(payload.resume.file_name.clone())
        .mime_str(&payload.resume.content_type)
        .map_err(|e| {
            SubmissionError::Permanent(format!(
                "invalid resume content type '{}': {e}",
                payload.resume.content_type
            ))
        })?;

    let mut form = Form::new()
        .text("application_id", payload.application_id.to_string())
        .text("applicant", applicant)
        .part("resume", resume);
    if let Some(ref cover_letter) = payload.cover_letter {
        form = form.text("cover_letter", cover_letter.clone());
    }
    Ok(form)
}

/// 5xx, 408 and 429 are worth retrying; other statuses are refusals.
fn classify_status(status: StatusCode, body: &str) -> SubmissionError {
    let detail = serde_json::from_str::<SubmitResponse>(body)
        .ok()
        .and_then(|r| r.error_message)
        .unwrap_or_else(|| truncate(body, 200));
    let message = format!("HTTP {}: {}", status.as_u16(), detail);

    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        SubmissionError::Transient(message)
    } else {
        SubmissionError::Permanent(message)
    }
}

fn classify_transport(error: &reqwest::Error) -> SubmissionError {
    if error.is_builder() {
        SubmissionError::Permanent(format!("request could not be built: {error}"))
    } else {
        SubmissionError::Transient(format!("request failed: {error}"))
    }
}

fn parse_receipt(
    body: &str,
    payload: &SubmissionPayload,
) -> Result<SubmissionReceipt, SubmissionError> {
    let response = match serde_json::from_str::<SubmitResponse>(body) {
        Ok(response) => response,
        Err(e) => {
            warn!(
                application_id = %payload.application_id,
                error = %e,
                "Accepted with an unreadable body"
            );
            SubmitResponse::default()
        }
    };

    if response.success == Some(false) {
        return Err(SubmissionError::Permanent(
            response
                .error_message
                .unwrap_or_else(|| "endpoint reported failure".to_string()),
        ));
    }

    // Accepted without a reference: the application id stands in for one.
    let confirmation_id = response
        .confirmation_id
        .unwrap_or_else(|| payload.application_id.to_string());
    Ok(SubmissionReceipt { confirmation_id })
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
