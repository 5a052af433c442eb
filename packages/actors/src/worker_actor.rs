//! Worker actor that runs submission cycles on a timer.

use std::time::Duration;

use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use submission_core::SubmissionEvent;
use tokio::sync::broadcast;

use crate::messages::{WorkerLifecycle, WorkerMessage, WorkerStats, WorkerStatus};
use crate::processor::{CycleOutcome, SubmissionProcessor};

/// State for the worker actor.
pub struct WorkerState {
    /// Runs the cycles.
    pub processor: SubmissionProcessor,
    /// Delay between cycles.
    pub poll_interval: Duration,
    /// Event broadcaster.
    pub event_tx: Option<broadcast::Sender<SubmissionEvent>>,
    pub lifecycle: WorkerLifecycle,
    /// Bumped on every start and stop; scheduled polls carry the value they
    /// were scheduled under.
    generation: u64,
    pub stats: WorkerStats,
}

impl WorkerState {
    /// Create a new worker state.
    pub fn new(processor: SubmissionProcessor, poll_interval: Duration) -> Self {
        Self {
            processor,
            poll_interval,
            event_tx: None,
            lifecycle: WorkerLifecycle::Stopped,
            generation: 0,
            stats: WorkerStats::default(),
        }
    }

    /// Set the event broadcaster.
    pub fn with_event_tx(mut self, tx: broadcast::Sender<SubmissionEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn worker_id(&self) -> &str {
        self.processor.worker_id()
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            worker_id: self.worker_id().to_string(),
            lifecycle: self.lifecycle,
            stats: self.stats.clone(),
        }
    }

    async fn run_cycle(&mut self) -> CycleOutcome {
        let outcome = self.processor.run_cycle().await;
        self.stats.record(&outcome);
        outcome
    }

    fn broadcast(&self, event: SubmissionEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub processor: SubmissionProcessor,
    pub poll_interval: Duration,
    pub event_tx: Option<broadcast::Sender<SubmissionEvent>>,
    /// Start polling as soon as the actor is up.
    pub autostart: bool,
}

/// Worker actor that drains the submission queue.
pub struct SubmissionWorker;

impl SubmissionWorker {
    fn schedule_poll(myself: &ActorRef<WorkerMessage>, state: &WorkerState) {
        let generation = state.generation;
        myself.send_after(state.poll_interval, move || WorkerMessage::Poll {
            generation,
        });
    }
}

impl Actor for SubmissionWorker {
    type Msg = WorkerMessage;
    type State = WorkerState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.processor.worker_id());

        let mut state = WorkerState::new(args.processor, args.poll_interval);
        if let Some(tx) = args.event_tx {
            state = state.with_event_tx(tx);
        }

        if args.autostart {
            myself.send_message(WorkerMessage::Start)?;
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
            WorkerMessage::Start => {
                if state.lifecycle == WorkerLifecycle::Running {
                    return Ok(());
                }
                state.lifecycle = WorkerLifecycle::Running;
                state.generation += 1;
                tracing::info!(worker_id = %state.worker_id(), "Worker polling started");

                state.broadcast(SubmissionEvent::WorkerStarted {
                    worker_id: state.worker_id().to_string(),
                    timestamp: Utc::now(),
                });
                myself.send_message(WorkerMessage::Poll {
                    generation: state.generation,
                })?;
            }

            WorkerMessage::Stop => {
                if state.lifecycle == WorkerLifecycle::Stopped {
                    return Ok(());
                }
                state.lifecycle = WorkerLifecycle::Stopped;
                state.generation += 1;
                tracing::info!(worker_id = %state.worker_id(), "Worker polling stopped");

                state.broadcast(SubmissionEvent::WorkerStopped {
                    worker_id: state.worker_id().to_string(),
                    timestamp: Utc::now(),
                });
            }

            WorkerMessage::Poll { generation } => {
                if state.lifecycle != WorkerLifecycle::Running || generation != state.generation {
                    return Ok(());
                }

                let outcome = state.run_cycle().await;
                tracing::debug!(worker_id = %state.worker_id(), ?outcome, "Cycle finished");

                // A Stop queued behind this poll invalidates the next one.
                Self::schedule_poll(&myself, state);
            }

            WorkerMessage::RunCycle { reply } => {
                let outcome = state.run_cycle().await;
                let _ = reply.send(outcome);
            }

            WorkerMessage::GetStatus { reply } => {
                let _ = reply.send(state.status());
            }

            WorkerMessage::Shutdown => {
                tracing::info!("Shutting down worker: {}", state.worker_id());
                if state.lifecycle == WorkerLifecycle::Running {
                    state.lifecycle = WorkerLifecycle::Stopped;
                    state.broadcast(SubmissionEvent::WorkerStopped {
                        worker_id: state.worker_id().to_string(),
                        timestamp: Utc::now(),
                    });
                }
                myself.stop(None);
                return Ok(());
            }
        }

        Ok(())
    }
}
