//! Error types for the transaction coordinator.

use crate::xa::XaError;
use std::fmt;
use thiserror::Error;

/// Result type for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors surfaced by the transaction manager, transactions and their adapters.
///
/// Every top-level `commit`, `rollback` or `begin` call yields at most one of
/// these. Resource failures during rollback never show up here; they are
/// logged and absorbed.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The operation is not valid for the current status.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the violated precondition.
        message: String,
    },

    /// `begin()` was called while the thread already has a transaction.
    #[error("nested transactions are not supported: thread already has a transaction")]
    NestedTransaction,

    /// `resume()` was handed no transaction or a completed one.
    #[error("invalid transaction reference: {message}")]
    InvalidTransactionReference {
        /// Why the reference was rejected.
        message: String,
    },

    /// The transaction was rolled back instead of committed.
    #[error("transaction rolled back: {reason}")]
    RolledBack {
        /// Short description of what triggered the rollback.
        reason: String,
        /// The synchronization failure that forced the rollback, if any.
        #[source]
        cause: Option<SynchronizationError>,
    },

    /// Participants decided an outcome on their own that differs from, or only
    /// partially matches, the coordinator's decision.
    #[error("heuristic outcome: {0}")]
    Heuristic(HeuristicOutcome),

    /// A resource failed at the protocol level in a way unrelated to the
    /// logical outcome of the transaction.
    #[error("coordinator internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
        /// The resource error that caused it, if any.
        #[source]
        source: Option<XaError>,
    },
}

impl CoordinatorError {
    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an invalid transaction reference error.
    pub fn invalid_reference(message: impl Into<String>) -> Self {
        Self::InvalidTransactionReference {
            message: message.into(),
        }
    }

    /// Creates a rolled back error without a cause.
    pub fn rolled_back(reason: impl Into<String>) -> Self {
        Self::RolledBack {
            reason: reason.into(),
            cause: None,
        }
    }

    /// Creates a rolled back error caused by a synchronization failure.
    pub fn rolled_back_by(reason: impl Into<String>, cause: Option<SynchronizationError>) -> Self {
        Self::RolledBack {
            reason: reason.into(),
            cause,
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error wrapping a resource error.
    pub fn internal_xa(message: impl Into<String>, source: XaError) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Returns true if this error reports a rollback.
    #[must_use]
    pub fn is_rolled_back(&self) -> bool {
        matches!(self, Self::RolledBack { .. })
    }

    /// Returns true if this error reports a heuristic outcome.
    #[must_use]
    pub fn is_heuristic(&self) -> bool {
        matches!(self, Self::Heuristic(_))
    }

    /// Returns the synchronization failure behind a rollback, if any.
    #[must_use]
    pub fn rollback_cause(&self) -> Option<&SynchronizationError> {
        match self {
            Self::RolledBack { cause, .. } => cause.as_ref(),
            _ => None,
        }
    }
}

/// Which heuristic outcome was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HeuristicOutcome {
    /// Every participant rolled back although commit was requested.
    Rollback,
    /// Some participants committed and others rolled back, or the outcome is
    /// hazardous.
    Mixed,
}

impl fmt::Display for HeuristicOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rollback => f.write_str("heuristic rollback"),
            Self::Mixed => f.write_str("heuristic mixed"),
        }
    }
}

/// Failure raised by a synchronization callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SynchronizationError {
    message: String,
}

impl SynchronizationError {
    /// Creates a new synchronization error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
