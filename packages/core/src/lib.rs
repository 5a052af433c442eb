//! Core domain types for the application submission engine.
//!
//! This crate contains shared types used across all packages:
//! - Identifiers, `Application` and the status state machine
//! - `QueueItem` and `BatchRequest` for the worklist
//! - Submission payloads sent to the external endpoint
//! - Events for notifications and live subscribers
//! - Environment-based configuration helpers

mod application;
pub mod env;
mod events;
mod ids;
mod payload;
mod queue;
mod status;

pub use application::{Application, StatusUpdate};
pub use env::ConfigError;
pub use events::SubmissionEvent;
pub use ids::{ApplicationId, BatchId, JobId, ResumeId, UserId};
pub use payload::{ApplicantInfo, ResumeDocument, SubmissionPayload, SubmissionReceipt};
pub use queue::{ApplicationBatch, BatchRequest, QueueItem};
pub use status::{ApplicationStatus, TransitionError, ensure_transition, is_valid_transition};
