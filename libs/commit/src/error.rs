//! Error taxonomy for the commit pipeline.
//!
//! Row-level conditions (a protected row, a rejected candidate) are not errors
//! here; they are outcome values recorded in the report. These types cover
//! what aborts a single candidate, a single batch, or a store call.

use std::time::Duration;

use roster_id::{IdError, RosterId};
use thiserror::Error;

use crate::lifecycle::TransitionError;
use crate::model::NaturalKey;

/// A candidate that cannot enter the pipeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// The element could not be read as a candidate object at all.
    #[error("unreadable candidate: {0}")]
    Unreadable(String),

    /// A required field is absent.
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// An ID field does not parse as its typed ID.
    #[error("invalid {field}: {source}")]
    InvalidId {
        field: &'static str,
        #[source]
        source: IdError,
    },

    /// The date is not an ISO `YYYY-MM-DD` calendar date.
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    /// The daypart is not one of morning, afternoon, evening.
    #[error("invalid daypart '{0}'")]
    InvalidDaypart(String),

    /// Confidence is not a finite number in `0.0..=1.0`.
    #[error("invalid confidence {0}, expected a value in 0.0..=1.0")]
    InvalidConfidence(f64),

    /// The candidate names a different roster than the commit operation.
    #[error("candidate roster {actual} does not match commit roster {expected}")]
    RosterMismatch { expected: RosterId, actual: RosterId },
}

/// Two rows share a natural key after deduplication.
///
/// This can only happen through an upstream defect, so it is never resolved
/// silently.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("duplicate natural key {key} after deduplication")]
pub struct DuplicateKeyDefect {
    pub key: NaturalKey,
}

/// Errors returned by an [`AssignmentStore`](crate::AssignmentStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A transaction failed and was rolled back.
    #[error("store transaction failed: {0}")]
    Transaction(String),

    /// The store's natural-key constraint rejected a write.
    #[error("natural key constraint violated: {0}")]
    UniqueViolation(String),

    /// A status change was refused by the lifecycle rules.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// A referenced row or report does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether resubmitting the same work may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Transaction(_) | Self::UniqueViolation(_)
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Why a batch failed as a whole.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error(transparent)]
    DuplicateKey(#[from] DuplicateKeyDefect),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The batch did not finish within its time budget; its transaction was
    /// dropped and rolled back.
    #[error("batch timed out after {limit:?}")]
    Timeout { limit: Duration },
}

impl CommitError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DuplicateKey(_) => false,
            Self::Store(e) => e.is_retryable(),
            Self::Timeout { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Actor;
    use crate::model::Status;

    #[test]
    fn test_store_error_retry_classification() {
        assert!(StoreError::Transaction("deadlock".into()).is_retryable());
        assert!(StoreError::Unavailable("down".into()).is_retryable());
        assert!(!StoreError::NotFound("x".into()).is_retryable());
        let transition = TransitionError::NotPermitted {
            actor: Actor::Planner,
            from: Some(Status::Fixed),
            to: Status::BlockedLeave,
        };
        assert!(!StoreError::from(transition).is_retryable());
    }

    #[test]
    fn test_commit_error_retry_classification() {
        assert!(CommitError::Timeout {
            limit: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(CommitError::from(StoreError::Transaction("x".into())).is_retryable());
    }
}
