//! Application status lifecycle and its transition table.
//!
//! Every mutation path (repository writes, the worker, cancellation) checks
//! [`is_valid_transition`] before persisting a status change. A rejected
//! transition is a caller error, never a transient condition.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current status of an application in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    /// Waiting in the worklist to be claimed.
    #[default]
    Pending,
    /// Claimed by a worker and being submitted.
    Processing,
    /// Accepted by the external endpoint.
    Submitted,
    /// Retries exhausted or a permanent error occurred.
    Failed,
    /// Withdrawn before it was claimed.
    Cancelled,
}

impl ApplicationStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [ApplicationStatus; 5] = [
        ApplicationStatus::Pending,
        ApplicationStatus::Processing,
        ApplicationStatus::Submitted,
        ApplicationStatus::Failed,
        ApplicationStatus::Cancelled,
    ];

    /// Statuses reachable from this one.
    pub fn allowed_transitions(self) -> &'static [ApplicationStatus] {
        use ApplicationStatus::*;
        match self {
            Pending => &[Processing, Cancelled],
            Processing => &[Submitted, Failed, Pending],
            Submitted => &[],
            Failed => &[Pending],
            Cancelled => &[],
        }
    }

    /// Check if the status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Get the wire name of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "PENDING",
            ApplicationStatus::Processing => "PROCESSING",
            ApplicationStatus::Submitted => "SUBMITTED",
            ApplicationStatus::Failed => "FAILED",
            ApplicationStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApplicationStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Invalid application status: {s}"))
    }
}

/// A status change the transition table forbids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: ApplicationStatus,
    pub to: ApplicationStatus,
}

/// Check whether `from -> to` is a legal status change.
///
/// Pure table lookup. Self-transitions are always illegal.
pub fn is_valid_transition(from: ApplicationStatus, to: ApplicationStatus) -> bool {
    from.allowed_transitions().contains(&to)
}

/// [`is_valid_transition`] as a `Result`, for `?` at persistence call sites.
pub fn ensure_transition(
    from: ApplicationStatus,
    to: ApplicationStatus,
) -> Result<(), TransitionError> {
    if is_valid_transition(from, to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}
