//! Message types for actor communication.

use db::DbError;
use ractor::RpcReplyPort;
use serde::Serialize;
use submission_core::{
    Application, ApplicationBatch, ApplicationId, BatchRequest, SubmissionEvent, UserId,
};
use tokio::sync::broadcast;

use crate::processor::CycleOutcome;
use crate::queue::QueueError;

/// Messages for the SubmissionWorker.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Begin polling.
    Start,

    /// Stop scheduling cycles. A cycle in progress completes.
    Stop,

    /// Scheduled poll; ignored unless `generation` is current.
    Poll { generation: u64 },

    /// Run one cycle now and report what it did.
    RunCycle { reply: RpcReplyPort<CycleOutcome> },

    /// Get lifecycle and counters.
    GetStatus { reply: RpcReplyPort<WorkerStatus> },

    /// Shutdown the worker.
    Shutdown,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Create and enqueue one application per job id.
    SubmitBatch {
        user_id: UserId,
        request: BatchRequest,
        reply: RpcReplyPort<Result<ApplicationBatch, EngineError>>,
    },

    /// Cancel an application that is still waiting in the worklist.
    CancelApplication {
        application_id: ApplicationId,
        reply: RpcReplyPort<Result<Application, EngineError>>,
    },

    /// Get an application by ID.
    GetApplication {
        application_id: ApplicationId,
        reply: RpcReplyPort<Result<Application, EngineError>>,
    },

    /// Number of items waiting in the worklist.
    QueueLength {
        reply: RpcReplyPort<Result<usize, EngineError>>,
    },

    /// Status of every worker.
    WorkerStatuses { reply: RpcReplyPort<Vec<WorkerStatus>> },

    /// Start all workers.
    StartWorkers,

    /// Stop all workers.
    StopWorkers,

    /// Subscribe to events.
    Subscribe {
        reply: RpcReplyPort<broadcast::Receiver<SubmissionEvent>>,
    },

    /// Shutdown the supervisor and its workers.
    Shutdown,
}

/// Whether a worker schedules cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerLifecycle {
    Stopped,
    Running,
}

/// Cycle counters, by outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub cycles: u64,
    pub idle: u64,
    pub submitted: u64,
    pub requeued: u64,
    pub failed: u64,
    pub skipped: u64,
    pub deferred: u64,
    pub unrecorded: u64,
    pub store_errors: u64,
}

impl WorkerStats {
    pub fn record(&mut self, outcome: &CycleOutcome) {
        self.cycles += 1;
        match outcome {
            CycleOutcome::Idle => self.idle += 1,
            CycleOutcome::Submitted { .. } => self.submitted += 1,
            CycleOutcome::Requeued { .. } => self.requeued += 1,
            CycleOutcome::Failed { .. } => self.failed += 1,
            CycleOutcome::Skipped { .. } => self.skipped += 1,
            CycleOutcome::Deferred { .. } => self.deferred += 1,
            CycleOutcome::Unrecorded { .. } => self.unrecorded += 1,
            CycleOutcome::StoreUnavailable { .. } => self.store_errors += 1,
        }
    }
}

/// Snapshot of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub lifecycle: WorkerLifecycle,
    pub stats: WorkerStats,
}

/// Error type for supervisor operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Batch has no job ids")]
    EmptyBatch,

    #[error("Application {0} is not waiting in the queue")]
    NotCancellable(ApplicationId),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Actor error: {0}")]
    Actor(String),
}
