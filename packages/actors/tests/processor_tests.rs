#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::{Arc, Mutex};

use actors::{
    ApplicationStore, BoxFuture, Collaborators, CycleOutcome, Notifier, NotifyError,
    SubmissionError, SubmissionProcessor, SubmissionQueue,
};
use resilience::CircuitState;
use submission_core::{
    Application, ApplicationStatus, BatchId, JobId, ResumeId, StatusUpdate, SubmissionEvent,
    UserId,
};
use tokio::sync::broadcast;

use common::{FakeContext, Harness, RecordingNotifier, ScriptedClient, breaker, receipt, retry};

fn transient(message: &str) -> SubmissionError {
    SubmissionError::Transient(message.to_string())
}

#[tokio::test]
async fn empty_queue_is_idle() {
    let harness = Harness::new(ScriptedClient::accepting());
    let processor = harness.processor(retry(0), 3);

    assert_eq!(processor.run_cycle().await, CycleOutcome::Idle);
    assert_eq!(harness.client.calls(), 0);
}

#[tokio::test]
async fn three_users_are_all_submitted_and_released() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new(ScriptedClient::accepting());
    let processor = harness.processor(retry(0), 3);

    let mut applications = Vec::new();
    for _ in 0..3 {
        applications.push(harness.submit(UserId::new()).await);
    }

    for application in &applications {
        let outcome = processor.run_cycle().await;
        assert_eq!(
            outcome,
            CycleOutcome::Submitted {
                application_id: application.id,
                confirmation_id: "CONF".into(),
            }
        );
    }

    assert_eq!(harness.queue.get_queue_length().await?, 0);
    for application in &applications {
        let stored = harness.applications.snapshot(application.id);
        assert_eq!(stored.status, ApplicationStatus::Submitted);
        assert_eq!(stored.confirmation_id.as_deref(), Some("CONF"));
        assert!(stored.submitted_at.is_some());
        assert!(!harness.queue.is_processing(application.id).await?);
        assert!(!harness.queue.is_user_processing(application.user_id).await?);
    }

    let submitted = harness
        .notifier
        .events()
        .into_iter()
        .filter(|(_, event)| matches!(event, SubmissionEvent::ApplicationSubmitted { .. }))
        .count();
    assert_eq!(submitted, 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_end_in_failed() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new(ScriptedClient::failing(transient("gateway timeout")));
    let processor = harness.processor(retry(2), 2);
    let application = harness.submit(UserId::new()).await;

    let first = processor.run_cycle().await;
    assert_eq!(
        first,
        CycleOutcome::Requeued {
            application_id: application.id,
            retry_count: 1,
        }
    );
    assert_eq!(harness.client.calls(), 3);
    let stored = harness.applications.snapshot(application.id);
    assert_eq!(stored.status, ApplicationStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(harness.queue.get_queue_length().await?, 1);
    assert!(!harness.queue.is_processing(application.id).await?);

    let second = processor.run_cycle().await;
    assert!(matches!(second, CycleOutcome::Failed { .. }));
    assert_eq!(harness.client.calls(), 6);

    let stored = harness.applications.snapshot(application.id);
    assert_eq!(stored.status, ApplicationStatus::Failed);
    assert_eq!(stored.retry_count, 2);
    let message = stored.error_message.unwrap_or_default();
    assert!(message.starts_with("Failed after 2 attempts"));
    assert!(message.contains("gateway timeout"));

    assert_eq!(harness.queue.get_queue_length().await?, 0);
    assert!(!harness.queue.is_user_processing(application.user_id).await?);
    assert!(harness.notifier.events().iter().any(|(user, event)| {
        *user == application.user_id && matches!(event, SubmissionEvent::ApplicationFailed { .. })
    }));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn transient_failure_recovered_within_one_cycle() {
    let client = ScriptedClient::accepting().then(Err(transient("connection reset")));
    let harness = Harness::new(client);
    let processor = harness.processor(retry(2), 3);
    let application = harness.submit(UserId::new()).await;

    let outcome = processor.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Submitted { .. }));
    assert_eq!(harness.client.calls(), 2);
    assert_eq!(harness.applications.snapshot(application.id).retry_count, 0);
}

#[tokio::test]
async fn same_user_waits_for_release() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new(ScriptedClient::accepting());
    let processor = harness.processor(retry(0), 3);
    let user_id = UserId::new();
    let first = harness.submit(user_id).await;
    let second = harness.submit(user_id).await;

    // Another worker holds the first.
    let claimed = harness.queue.dequeue("worker-other").await?;
    assert_eq!(claimed.map(|item| item.application_id), Some(first.id));

    assert_eq!(processor.run_cycle().await, CycleOutcome::Idle);
    assert_eq!(harness.queue.get_queue_length().await?, 1);

    harness.queue.release_lock(first.id, user_id).await?;
    let outcome = processor.run_cycle().await;
    assert_eq!(
        outcome,
        CycleOutcome::Submitted {
            application_id: second.id,
            confirmation_id: "CONF".into(),
        }
    );
    Ok(())
}

#[tokio::test]
async fn rejection_fails_without_retry() -> Result<(), Box<dyn Error>> {
    let client = ScriptedClient::failing(SubmissionError::Permanent("invalid job id".into()));
    let harness = Harness::new(client);
    let shared_breaker = Arc::new(breaker(1));
    let processor = harness.processor_with_breaker(retry(3), 3, shared_breaker.clone());
    let application = harness.submit(UserId::new()).await;

    let outcome = processor.run_cycle().await;
    assert_eq!(
        outcome,
        CycleOutcome::Failed {
            application_id: application.id,
            error: "Submission rejected: invalid job id".into(),
        }
    );
    assert_eq!(harness.client.calls(), 1);

    let stored = harness.applications.snapshot(application.id);
    assert_eq!(stored.status, ApplicationStatus::Failed);
    assert_eq!(stored.retry_count, 0);

    // Rejections say nothing about endpoint health.
    assert_eq!(shared_breaker.metrics().await.failure_count, 0);
    assert!(!harness.queue.is_processing(application.id).await?);
    Ok(())
}

#[tokio::test]
async fn open_circuit_counts_as_retryable() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new(ScriptedClient::accepting());
    let shared_breaker = Arc::new(breaker(5));
    shared_breaker.force_open().await;
    let processor = harness.processor_with_breaker(retry(2), 3, shared_breaker);
    let application = harness.submit(UserId::new()).await;

    let outcome = processor.run_cycle().await;
    assert_eq!(
        outcome,
        CycleOutcome::Requeued {
            application_id: application.id,
            retry_count: 1,
        }
    );
    assert_eq!(harness.client.calls(), 0);

    let stored = harness.applications.snapshot(application.id);
    assert_eq!(stored.status, ApplicationStatus::Pending);
    assert!(
        stored
            .error_message
            .unwrap_or_default()
            .contains("circuit breaker is open")
    );
    assert_eq!(harness.queue.get_queue_length().await?, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn repeated_transient_failures_trip_the_breaker() {
    let harness = Harness::new(ScriptedClient::failing(transient("503")));
    let shared_breaker = Arc::new(breaker(2));
    let processor = harness.processor_with_breaker(retry(0), 5, shared_breaker.clone());
    harness.submit(UserId::new()).await;

    processor.run_cycle().await;
    processor.run_cycle().await;
    assert_eq!(harness.client.calls(), 2);
    assert_eq!(shared_breaker.state().await, CircuitState::Open);

    // Open circuit: the endpoint is not called.
    processor.run_cycle().await;
    assert_eq!(harness.client.calls(), 2);
}

#[tokio::test]
async fn missing_resume_fails_immediately() {
    let harness = Harness::with_parts(
        ScriptedClient::accepting(),
        FakeContext::missing_resume(),
        RecordingNotifier::default(),
    );
    let processor = harness.processor(retry(3), 3);
    let application = harness.submit(UserId::new()).await;

    let outcome = processor.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Failed { .. }));
    assert_eq!(harness.client.calls(), 0);

    let stored = harness.applications.snapshot(application.id);
    assert_eq!(stored.status, ApplicationStatus::Failed);
    assert_eq!(stored.retry_count, 0);
    assert!(
        stored
            .error_message
            .unwrap_or_default()
            .starts_with("Failed to load submission data")
    );
}

#[tokio::test]
async fn panic_is_absorbed_as_retryable_failure() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new(ScriptedClient::panicking());
    let processor = harness.processor(retry(0), 3);
    let application = harness.submit(UserId::new()).await;

    let outcome = processor.run_cycle().await;
    assert_eq!(
        outcome,
        CycleOutcome::Requeued {
            application_id: application.id,
            retry_count: 1,
        }
    );

    let stored = harness.applications.snapshot(application.id);
    assert_eq!(stored.status, ApplicationStatus::Pending);
    assert!(
        stored
            .error_message
            .unwrap_or_default()
            .contains("endpoint adapter blew up")
    );
    assert!(!harness.queue.is_processing(application.id).await?);
    assert_eq!(harness.queue.get_queue_length().await?, 1);
    Ok(())
}

#[tokio::test]
async fn stale_claim_is_skipped_and_released() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new(ScriptedClient::accepting());
    let processor = harness.processor(retry(0), 3);
    let application = harness.submit(UserId::new()).await;
    harness.applications.insert(Application {
        status: ApplicationStatus::Cancelled,
        ..application.clone()
    });

    let outcome = processor.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Skipped { .. }));
    assert_eq!(harness.client.calls(), 0);
    assert_eq!(harness.queue.get_queue_length().await?, 0);
    assert!(!harness.queue.is_user_processing(application.user_id).await?);
    Ok(())
}

#[tokio::test]
async fn notifier_failure_does_not_change_outcome() -> Result<(), Box<dyn Error>> {
    let harness = Harness::with_parts(
        ScriptedClient::accepting(),
        FakeContext::ok(),
        RecordingNotifier::failing(),
    );
    let processor = harness.processor(retry(0), 3);
    let application = harness.submit(UserId::new()).await;

    let outcome = processor.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Submitted { .. }));
    assert_eq!(harness.notifier.events().len(), 1);
    assert!(!harness.queue.is_processing(application.id).await?);
    Ok(())
}

#[tokio::test]
async fn cover_letter_prefers_context_then_application() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new(ScriptedClient::accepting());
    let processor = harness.processor(retry(0), 3);
    let application = Application::new(UserId::new(), JobId::new(), ResumeId::new(), BatchId::new())
        .with_cover_letter("Dear team");
    harness.applications.insert(application.clone());
    harness.queue.enqueue(&application.queue_item()).await?;

    processor.run_cycle().await;
    let payload = harness.client.last_payload().ok_or("no payload sent")?;
    assert_eq!(payload.cover_letter.as_deref(), Some("Dear team"));
    assert_eq!(payload.application_id, application.id);

    let harness = Harness::with_parts(
        ScriptedClient::accepting(),
        FakeContext::with_cover_letter("Tailored letter"),
        RecordingNotifier::default(),
    );
    let processor = harness.processor(retry(0), 3);
    harness.applications.insert(application.clone());
    harness.queue.enqueue(&application.queue_item()).await?;

    processor.run_cycle().await;
    let payload = harness.client.last_payload().ok_or("no payload sent")?;
    assert_eq!(payload.cover_letter.as_deref(), Some("Tailored letter"));
    Ok(())
}

#[tokio::test]
async fn events_are_broadcast() {
    let harness = Harness::new(ScriptedClient::accepting().then(Ok(receipt("ABC-1"))));
    let (tx, mut rx) = broadcast::channel(16);
    let processor = harness.processor(retry(0), 3).with_events(tx);
    let application = harness.submit(UserId::new()).await;

    processor.run_cycle().await;

    let claimed = rx.recv().await.unwrap();
    assert!(matches!(
        claimed,
        SubmissionEvent::ApplicationClaimed { application_id, .. } if application_id == application.id
    ));
    let submitted = rx.recv().await.unwrap();
    assert!(matches!(
        submitted,
        SubmissionEvent::ApplicationSubmitted { ref confirmation_id, .. } if confirmation_id == "ABC-1"
    ));
}

#[tokio::test]
async fn retry_count_never_decreases() {
    let harness = Harness::new(ScriptedClient::accepting());
    let application = harness.submit(UserId::new()).await;
    let stores = harness.collaborators().applications;

    stores
        .persist_status(application.id, ApplicationStatus::Processing, StatusUpdate::default())
        .await
        .unwrap();
    stores
        .persist_status(application.id, ApplicationStatus::Pending, StatusUpdate::failed(2, "x"))
        .await
        .unwrap();
    stores
        .persist_status(application.id, ApplicationStatus::Processing, StatusUpdate::default())
        .await
        .unwrap();

    let lowered = stores
        .persist_status(application.id, ApplicationStatus::Pending, StatusUpdate::failed(1, "y"))
        .await;
    assert!(lowered.is_err());
    assert_eq!(harness.applications.snapshot(application.id).retry_count, 2);
}

#[tokio::test(start_paused = true)]
async fn dropped_status_write_is_retried() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new(ScriptedClient::failing(transient("gateway timeout")));
    let processor = harness.processor(retry(0), 5);
    let application = harness.submit(UserId::new()).await;
    harness
        .applications
        .fail_writes(ApplicationStatus::Pending, 1);

    let outcome = processor.run_cycle().await;
    assert_eq!(
        outcome,
        CycleOutcome::Requeued {
            application_id: application.id,
            retry_count: 1,
        }
    );

    let stored = harness.applications.snapshot(application.id);
    assert_eq!(stored.status, ApplicationStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(harness.queue.get_queue_length().await?, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unrecorded_attempt_is_settled_on_next_claim() -> Result<(), Box<dyn Error>> {
    let client = ScriptedClient::accepting().then(Err(transient("gateway timeout")));
    let harness = Harness::new(client);
    let processor = harness.processor(retry(0), 5);
    let application = harness.submit(UserId::new()).await;
    harness
        .applications
        .fail_writes(ApplicationStatus::Pending, usize::MAX);

    let outcome = processor.run_cycle().await;
    assert!(matches!(
        outcome,
        CycleOutcome::Unrecorded { application_id, .. } if application_id == application.id
    ));
    assert_eq!(
        harness.applications.snapshot(application.id).status,
        ApplicationStatus::Processing
    );
    assert_eq!(harness.queue.get_queue_length().await?, 1);
    assert!(!harness.queue.is_processing(application.id).await?);

    // The lost attempt is counted once, without calling the endpoint.
    harness.applications.heal();
    let outcome = processor.run_cycle().await;
    assert_eq!(
        outcome,
        CycleOutcome::Requeued {
            application_id: application.id,
            retry_count: 1,
        }
    );
    assert_eq!(harness.client.calls(), 1);
    let stored = harness.applications.snapshot(application.id);
    assert_eq!(stored.status, ApplicationStatus::Pending);
    assert_eq!(stored.retry_count, 1);

    let outcome = processor.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Submitted { .. }));
    assert_eq!(
        harness.applications.snapshot(application.id).status,
        ApplicationStatus::Submitted
    );
    assert_eq!(harness.queue.get_queue_length().await?, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failure_is_announced_only_once_recorded() -> Result<(), Box<dyn Error>> {
    let harness = Harness::new(ScriptedClient::failing(transient("503")));
    let processor = harness.processor(retry(0), 1);
    let application = harness.submit(UserId::new()).await;
    harness
        .applications
        .fail_writes(ApplicationStatus::Failed, usize::MAX);

    let outcome = processor.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Unrecorded { .. }));
    assert!(harness.notifier.events().is_empty());
    assert_eq!(harness.queue.get_queue_length().await?, 1);

    harness.applications.heal();
    let outcome = processor.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Failed { .. }));
    assert_eq!(harness.client.calls(), 1);

    let stored = harness.applications.snapshot(application.id);
    assert_eq!(stored.status, ApplicationStatus::Failed);
    assert_eq!(stored.retry_count, 1);
    let failures = harness
        .notifier
        .events()
        .into_iter()
        .filter(|(_, event)| matches!(event, SubmissionEvent::ApplicationFailed { .. }))
        .count();
    assert_eq!(failures, 1);
    assert_eq!(harness.queue.get_queue_length().await?, 0);
    Ok(())
}

/// Notifier that records whether the user's lease was still held.
struct LeaseWatcher {
    queue: SubmissionQueue,
    held: Mutex<Vec<bool>>,
}

impl Notifier for LeaseWatcher {
    fn notify<'a>(
        &'a self,
        user_id: UserId,
        _event: &'a SubmissionEvent,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            let held = self.queue.is_user_processing(user_id).await.unwrap_or(true);
            self.held.lock().unwrap().push(held);
            Ok(())
        })
    }
}

#[tokio::test]
async fn notifications_follow_release() -> Result<(), Box<dyn Error>> {
    let client = ScriptedClient::accepting().then(Err(SubmissionError::Permanent("closed".into())));
    let harness = Harness::new(client);
    let watcher = Arc::new(LeaseWatcher {
        queue: harness.queue.clone(),
        held: Mutex::default(),
    });
    let processor = SubmissionProcessor::new(
        "worker-test",
        harness.queue.clone(),
        Collaborators {
            notifier: watcher.clone(),
            ..harness.collaborators()
        },
        Arc::new(breaker(5)),
        retry(0),
        3,
    );
    let user_id = UserId::new();
    harness.submit(user_id).await;
    harness.submit(user_id).await;

    assert!(matches!(processor.run_cycle().await, CycleOutcome::Failed { .. }));
    assert!(matches!(processor.run_cycle().await, CycleOutcome::Submitted { .. }));
    assert_eq!(*watcher.held.lock().unwrap(), vec![false, false]);
    Ok(())
}
