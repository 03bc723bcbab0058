//! Error taxonomy for the dispatch core.
//!
//! Validation failures are rejected synchronously and never retried.
//! State conflicts mean the caller is holding a stale view and must
//! re-fetch before retrying. Submission failures surface only after
//! bounded retry inside the bid submitter.

use thiserror::Error;

/// Errors returned by the dispatch components.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// Malformed input, rejected before any state is created.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// An entity was not in the state the caller assumed.
    #[error("{entity} {id}: illegal transition {from} -> {to}")]
    StateConflict {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    /// Referenced load does not exist (stale id or already purged).
    #[error("load {0} not found")]
    LoadNotFound(String),

    /// Referenced capacity unit does not exist.
    #[error("capacity unit {0} not found")]
    CapacityNotFound(String),

    /// Bid submission failed after bounded retry.
    #[error("bid submission for {posting_id} failed after {attempts} attempts: {reason}")]
    ExternalSubmission {
        posting_id: String,
        attempts: u32,
        reason: String,
    },
}

impl DispatchError {
    /// Shorthand for a validation rejection.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
