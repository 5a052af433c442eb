//! Actor system for the submission engine.
//!
//! This crate provides the shared worklist with its leases, the per-cycle
//! submission processor, and the Ractor-based worker and supervisor.
//!
//! # Architecture
//!
//! - `Supervisor` - Top-level actor: accepts batches, cancels, owns the workers
//! - `SubmissionWorker` - Runs one submission cycle per poll
//! - `SubmissionQueue` - Worklist and item/user leases in the shared store
//!
//! # Usage
//!
//! ```ignore
//! use actors::{SupervisorArgs, SupervisorMessage, start_supervisor};
//!
//! let (supervisor, handle) = start_supervisor(args).await?;
//!
//! let batch = ractor::call!(supervisor, |reply| SupervisorMessage::SubmitBatch {
//!     user_id,
//!     request,
//!     reply,
//! })?;
//! ```

pub mod collaborators;
pub mod config;
mod messages;
pub mod processor;
pub mod queue;
mod supervisor;
mod worker_actor;

pub use collaborators::{
    ApplicationStore, BoxFuture, Collaborators, ContextError, Notifier, NotifyError,
    SubmissionClient, SubmissionContext, SubmissionContextSource, SubmissionError,
};
pub use config::{EngineConfig, QueueConfig, WorkerConfig};
pub use messages::{
    EngineError, SupervisorMessage, WorkerLifecycle, WorkerMessage, WorkerStats, WorkerStatus,
};
pub use processor::{CycleOutcome, SubmissionProcessor};
pub use queue::{QueueError, SubmissionQueue};
pub use supervisor::{Supervisor, SupervisorArgs, SupervisorState, start_supervisor};
pub use worker_actor::{SubmissionWorker, WorkerArgs, WorkerState};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
