//! Supervisor actor: the enqueue API and the owner of the worker pool.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use db::SharedStore;
use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use resilience::CircuitBreaker;
use submission_core::{
    Application, ApplicationBatch, ApplicationId, ApplicationStatus, BatchId, BatchRequest,
    StatusUpdate, SubmissionEvent, UserId,
};
use tokio::sync::broadcast;

use crate::collaborators::Collaborators;
use crate::config::EngineConfig;
use crate::messages::{EngineError, SupervisorMessage, WorkerMessage, WorkerStatus};
use crate::processor::SubmissionProcessor;
use crate::queue::SubmissionQueue;
use crate::worker_actor::{SubmissionWorker, WorkerArgs};

const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Supervisor arguments.
pub struct SupervisorArgs {
    pub config: EngineConfig,
    pub store: Arc<dyn SharedStore>,
    pub collaborators: Collaborators,
    /// Start the workers polling immediately.
    pub autostart: bool,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    config: EngineConfig,
    store: Arc<dyn SharedStore>,
    queue: SubmissionQueue,
    collaborators: Collaborators,
    /// Shared by every worker in this process.
    breaker: Arc<CircuitBreaker>,
    /// Event broadcaster.
    pub event_tx: broadcast::Sender<SubmissionEvent>,
    workers: Vec<ActorRef<WorkerMessage>>,
    running: bool,
}

impl SupervisorState {
    /// Create a new supervisor state.
    pub fn new(args: SupervisorArgs) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        let queue = SubmissionQueue::new(args.store.clone(), args.config.queue.clone());
        let breaker = Arc::new(CircuitBreaker::new("submission", args.config.breaker));
        Self {
            config: args.config,
            store: args.store,
            queue,
            collaborators: args.collaborators,
            breaker,
            event_tx,
            workers: Vec::new(),
            running: args.autostart,
        }
    }

    /// Worker ids are unique across every process sharing the store.
    async fn next_worker_id(&self) -> Result<String, ActorProcessingErr> {
        let key = format!("{}:worker_seq", self.config.queue.key_prefix);
        let seq = self
            .store
            .increment(&key)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("Failed to allocate worker id: {}", e)))?;
        Ok(format!("worker-{}", seq))
    }

    async fn submit_batch(
        &self,
        user_id: UserId,
        request: BatchRequest,
    ) -> Result<ApplicationBatch, EngineError> {
        if request.job_ids.is_empty() {
            return Err(EngineError::EmptyBatch);
        }

        let batch_id = BatchId::new();
        let applications = request.into_applications(user_id, batch_id);
        self.collaborators
            .applications
            .insert_batch(&applications)
            .await?;

        let items: Vec<_> = applications.iter().map(Application::queue_item).collect();
        self.queue.enqueue_batch(&items).await?;

        let application_ids: Vec<ApplicationId> = applications.iter().map(|a| a.id).collect();
        tracing::info!(
            batch_id = %batch_id,
            user_id = %user_id,
            count = application_ids.len(),
            "Batch queued"
        );

        let event = SubmissionEvent::BatchQueued {
            batch_id,
            user_id,
            application_ids: application_ids.clone(),
            timestamp: Utc::now(),
        };
        self.collaborators.notify(user_id, &event).await;
        let _ = self.event_tx.send(event);

        Ok(ApplicationBatch {
            batch_id,
            application_ids,
        })
    }

    async fn cancel(&self, application_id: ApplicationId) -> Result<Application, EngineError> {
        let applications = &self.collaborators.applications;
        let application = applications.get(application_id).await?;
        if application.status != ApplicationStatus::Pending {
            return Err(EngineError::NotCancellable(application_id));
        }

        // Only an item still in the worklist is unclaimed.
        if !self.queue.remove_from_queue(application_id).await? {
            return Err(EngineError::NotCancellable(application_id));
        }

        let cancelled = match applications
            .persist_status(
                application_id,
                ApplicationStatus::Cancelled,
                StatusUpdate::default(),
            )
            .await
        {
            Ok(cancelled) => cancelled,
            Err(e) => {
                if let Err(requeue_err) = self.queue.enqueue(&application.queue_item()).await {
                    tracing::error!(
                        application_id = %application_id,
                        error = %requeue_err,
                        "Failed to restore item after a failed cancel"
                    );
                }
                return Err(e.into());
            }
        };

        tracing::info!(application_id = %application_id, "Application cancelled");
        let event = SubmissionEvent::ApplicationCancelled {
            application_id,
            user_id: cancelled.user_id,
            timestamp: Utc::now(),
        };
        self.collaborators.notify(cancelled.user_id, &event).await;
        let _ = self.event_tx.send(event);

        Ok(cancelled)
    }

    async fn worker_statuses(&self) -> Vec<WorkerStatus> {
        let mut statuses = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            let result = ractor::rpc::call(
                worker,
                |reply| WorkerMessage::GetStatus { reply },
                Some(STATUS_TIMEOUT),
            )
            .await;
            if let Ok(ractor::rpc::CallResult::Success(status)) = result {
                statuses.push(status);
            }
        }
        statuses
    }

    fn broadcast_to_workers(&self, message: impl Fn() -> WorkerMessage) {
        for worker in &self.workers {
            let _ = worker.send_message(message());
        }
    }
}

async fn spawn_worker(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState,
) -> Result<ActorRef<WorkerMessage>, ActorProcessingErr> {
    let worker_id = state.next_worker_id().await?;
    let processor = SubmissionProcessor::new(
        worker_id,
        state.queue.clone(),
        state.collaborators.clone(),
        state.breaker.clone(),
        state.config.retry,
        state.config.worker.max_retries,
    )
    .with_events(state.event_tx.clone());

    let args = WorkerArgs {
        processor,
        poll_interval: state.config.worker.poll_interval,
        event_tx: Some(state.event_tx.clone()),
        autostart: state.running,
    };

    let (worker, _handle) = Actor::spawn_linked(None, SubmissionWorker, args, myself.get_cell())
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;

    state.workers.push(worker.clone());
    Ok(worker)
}

/// Supervisor actor that owns the worker pool.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            workers = args.config.worker.worker_count,
            "Starting submission supervisor"
        );

        let mut state = SupervisorState::new(args);
        for _ in 0..state.config.worker.worker_count {
            spawn_worker(&myself, &mut state).await?;
        }

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::SubmitBatch {
                user_id,
                request,
                reply,
            } => {
                let result = state.submit_batch(user_id, request).await;
                if let Err(ref e) = result {
                    tracing::warn!("Failed to queue batch: {}", e);
                }
                let _ = reply.send(result);
            }

            SupervisorMessage::CancelApplication {
                application_id,
                reply,
            } => {
                let _ = reply.send(state.cancel(application_id).await);
            }

            SupervisorMessage::GetApplication {
                application_id,
                reply,
            } => {
                let result = state
                    .collaborators
                    .applications
                    .get(application_id)
                    .await
                    .map_err(EngineError::from);
                let _ = reply.send(result);
            }

            SupervisorMessage::QueueLength { reply } => {
                let _ = reply.send(state.queue.get_queue_length().await.map_err(EngineError::from));
            }

            SupervisorMessage::WorkerStatuses { reply } => {
                let _ = reply.send(state.worker_statuses().await);
            }

            SupervisorMessage::StartWorkers => {
                state.running = true;
                state.broadcast_to_workers(|| WorkerMessage::Start);
            }

            SupervisorMessage::StopWorkers => {
                state.running = false;
                state.broadcast_to_workers(|| WorkerMessage::Stop);
            }

            SupervisorMessage::Subscribe { reply } => {
                let _ = reply.send(state.event_tx.subscribe());
            }

            SupervisorMessage::Shutdown => {
                tracing::info!("Shutting down supervisor");
                state.running = false;
                state.broadcast_to_workers(|| WorkerMessage::Shutdown);
                myself.stop(None);
                return Ok(());
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                tracing::info!("Worker {} terminated: {:?}", cell.get_id(), reason);
                state.workers.retain(|w| w.get_id() != cell.get_id());
            }
            SupervisionEvent::ActorFailed(cell, error) => {
                tracing::warn!("Worker {} failed: {}", cell.get_id(), error);
                state.workers.retain(|w| w.get_id() != cell.get_id());
                spawn_worker(&myself, state).await?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Start the supervisor.
pub async fn start_supervisor(
    args: SupervisorArgs,
) -> Result<(ActorRef<SupervisorMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    let (actor, handle) =
        Actor::spawn(Some("submission-supervisor".to_string()), Supervisor, args).await?;

    Ok((actor, handle))
}
