#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{
    ApplicationStore, BoxFuture, Collaborators, ContextError, Notifier, NotifyError, QueueConfig,
    SubmissionClient, SubmissionContext, SubmissionContextSource, SubmissionError,
    SubmissionProcessor, SubmissionQueue,
};
use db::{DbError, MemoryStore, SharedStore};
use resilience::{CircuitBreaker, CircuitBreakerConfig, RetryConfig};
use submission_core::{
    ApplicantInfo, Application, ApplicationId, ApplicationStatus, BatchId, JobId, ResumeDocument,
    ResumeId, StatusUpdate, SubmissionEvent, SubmissionPayload, SubmissionReceipt, UserId,
    ensure_transition,
};

/// Application store that enforces the status table in memory.
#[derive(Default)]
pub struct FakeApplications {
    rows: Mutex<HashMap<ApplicationId, Application>>,
    // Writes into a status fail this many more times.
    faults: Mutex<HashMap<ApplicationStatus, usize>>,
}

impl FakeApplications {
    pub fn insert(&self, application: Application) {
        self.rows
            .lock()
            .unwrap()
            .insert(application.id, application);
    }

    pub fn snapshot(&self, id: ApplicationId) -> Application {
        self.rows.lock().unwrap().get(&id).cloned().unwrap()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    /// Make the next `times` writes into `to` fail as if the store dropped them.
    pub fn fail_writes(&self, to: ApplicationStatus, times: usize) {
        self.faults.lock().unwrap().insert(to, times);
    }

    pub fn heal(&self) {
        self.faults.lock().unwrap().clear();
    }

    fn take_fault(&self, to: ApplicationStatus) -> bool {
        let mut faults = self.faults.lock().unwrap();
        match faults.get_mut(&to) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

impl ApplicationStore for FakeApplications {
    fn get(&self, id: ApplicationId) -> BoxFuture<'_, Result<Application, DbError>> {
        let found = self.rows.lock().unwrap().get(&id).cloned();
        Box::pin(async move { found.ok_or_else(|| DbError::NotFound(id.to_string())) })
    }

    fn insert_batch<'a>(
        &'a self,
        applications: &'a [Application],
    ) -> BoxFuture<'a, Result<(), DbError>> {
        for application in applications {
            self.insert(application.clone());
        }
        Box::pin(async { Ok(()) })
    }

    fn persist_status(
        &self,
        id: ApplicationId,
        to: ApplicationStatus,
        update: StatusUpdate,
    ) -> BoxFuture<'_, Result<Application, DbError>> {
        let result = (|| -> Result<Application, DbError> {
            if self.take_fault(to) {
                return Err(DbError::Query("connection dropped".into()));
            }
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .get_mut(&id)
                .ok_or_else(|| DbError::NotFound(id.to_string()))?;
            ensure_transition(row.status, to)?;
            if let Some(requested) = update.retry_count
                && requested < row.retry_count
            {
                return Err(DbError::RetryCountDecreased {
                    id: id.to_string(),
                    current: row.retry_count,
                    requested,
                });
            }
            row.apply(to, &update);
            Ok(row.clone())
        })();
        Box::pin(async move { result })
    }
}

/// Client that replays scripted responses, then repeats `fallback`.
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<SubmissionReceipt, SubmissionError>>>,
    fallback: Result<SubmissionReceipt, SubmissionError>,
    panics: bool,
    calls: AtomicUsize,
    payloads: Mutex<Vec<SubmissionPayload>>,
}

impl ScriptedClient {
    pub fn accepting() -> Self {
        Self::with_fallback(Ok(receipt("CONF")))
    }

    pub fn failing(error: SubmissionError) -> Self {
        Self::with_fallback(Err(error))
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::accepting()
        }
    }

    fn with_fallback(fallback: Result<SubmissionReceipt, SubmissionError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            panics: false,
            calls: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, response: Result<SubmissionReceipt, SubmissionError>) -> Self {
        self.script.lock().unwrap().push_back(response);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_payload(&self) -> Option<SubmissionPayload> {
        self.payloads.lock().unwrap().last().cloned()
    }
}

impl SubmissionClient for ScriptedClient {
    fn submit<'a>(
        &'a self,
        _job_id: JobId,
        payload: &'a SubmissionPayload,
    ) -> BoxFuture<'a, Result<SubmissionReceipt, SubmissionError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panics {
                panic!("endpoint adapter blew up");
            }
            self.payloads.lock().unwrap().push(payload.clone());
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        })
    }
}

pub fn receipt(confirmation_id: &str) -> SubmissionReceipt {
    SubmissionReceipt {
        confirmation_id: confirmation_id.to_string(),
    }
}

/// Context source serving one fixed applicant, or failing every lookup.
pub struct FakeContext {
    missing_resume: bool,
    cover_letter: Option<String>,
}

impl FakeContext {
    pub fn ok() -> Self {
        Self {
            missing_resume: false,
            cover_letter: None,
        }
    }

    pub fn missing_resume() -> Self {
        Self {
            missing_resume: true,
            cover_letter: None,
        }
    }

    pub fn with_cover_letter(cover_letter: &str) -> Self {
        Self {
            missing_resume: false,
            cover_letter: Some(cover_letter.to_string()),
        }
    }
}

impl SubmissionContextSource for FakeContext {
    fn fetch_context<'a>(
        &'a self,
        application: &'a Application,
    ) -> BoxFuture<'a, Result<SubmissionContext, ContextError>> {
        Box::pin(async move {
            if self.missing_resume {
                return Err(ContextError::MissingResume(application.resume_id.to_string()));
            }
            Ok(SubmissionContext {
                resume: ResumeDocument {
                    file_name: "resume.pdf".into(),
                    content_type: "application/pdf".into(),
                    bytes: b"%PDF-1.7".to_vec(),
                },
                applicant: ApplicantInfo {
                    full_name: "Sam Rivera".into(),
                    email: "sam@example.com".into(),
                    phone: None,
                    location: None,
                    links: Vec::new(),
                },
                cover_letter: self.cover_letter.clone(),
            })
        })
    }
}

/// Notifier that records every event, optionally failing each call.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(UserId, SubmissionEvent)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<(UserId, SubmissionEvent)> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify<'a>(
        &'a self,
        user_id: UserId,
        event: &'a SubmissionEvent,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        self.events.lock().unwrap().push((user_id, event.clone()));
        let fail = self.fail;
        Box::pin(async move {
            if fail {
                Err(NotifyError("mailer offline".into()))
            } else {
                Ok(())
            }
        })
    }
}

/// Everything one scenario needs, wired against in-memory fakes.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub queue: SubmissionQueue,
    pub applications: Arc<FakeApplications>,
    pub client: Arc<ScriptedClient>,
    pub context: Arc<FakeContext>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new(client: ScriptedClient) -> Self {
        Self::with_parts(client, FakeContext::ok(), RecordingNotifier::default())
    }

    pub fn with_parts(
        client: ScriptedClient,
        context: FakeContext,
        notifier: RecordingNotifier,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let queue = SubmissionQueue::new(store.clone() as Arc<dyn SharedStore>, queue_config());
        Self {
            store,
            queue,
            applications: Arc::new(FakeApplications::default()),
            client: Arc::new(client),
            context: Arc::new(context),
            notifier: Arc::new(notifier),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            applications: self.applications.clone(),
            context: self.context.clone(),
            client: self.client.clone(),
            notifier: self.notifier.clone(),
        }
    }

    pub fn processor(&self, retry: RetryConfig, max_retries: u32) -> SubmissionProcessor {
        self.processor_with_breaker(retry, max_retries, Arc::new(breaker(5)))
    }

    pub fn processor_with_breaker(
        &self,
        retry: RetryConfig,
        max_retries: u32,
        breaker: Arc<CircuitBreaker>,
    ) -> SubmissionProcessor {
        SubmissionProcessor::new(
            "worker-test",
            self.queue.clone(),
            self.collaborators(),
            breaker,
            retry,
            max_retries,
        )
    }

    /// Store a PENDING application for `user_id` and enqueue it.
    pub async fn submit(&self, user_id: UserId) -> Application {
        let application = Application::new(user_id, JobId::new(), ResumeId::new(), BatchId::new());
        self.applications.insert(application.clone());
        self.queue.enqueue(&application.queue_item()).await.unwrap();
        application
    }
}

pub fn queue_config() -> QueueConfig {
    QueueConfig {
        lock_ttl: Duration::from_secs(30),
        scan_window: 10,
        key_prefix: "test".into(),
    }
}

/// Retry executor with no jitter, so delays are exact.
pub fn retry(max_retries: u32) -> RetryConfig {
    RetryConfig::new(max_retries, 100, 1_000).with_jitter(0.0)
}

pub fn breaker(failure_threshold: u32) -> CircuitBreaker {
    CircuitBreaker::new(
        "submission-test",
        CircuitBreakerConfig {
            failure_threshold,
            failure_window: Duration::from_secs(60),
            open_duration: Duration::from_secs(30),
            half_open_max_attempts: 1,
        },
    )
}
