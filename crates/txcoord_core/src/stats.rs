//! Coordinator statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! use txcoord_core::TransactionManager;
//!
//! let tm = TransactionManager::default();
//! tm.begin()?;
//! tm.commit()?;
//!
//! let stats = tm.stats().snapshot();
//! println!("Committed: {}", stats.committed);
//! ```

use crate::error::CoordinatorError;
use crate::types::Status;
use std::sync::atomic::{AtomicU64, Ordering};

/// Completion counters.
///
/// All counters are atomic and can be read while transactions run.
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    /// Transactions begun.
    started: AtomicU64,
    /// Transactions committed.
    committed: AtomicU64,
    /// Transactions rolled back, including failed commits.
    rolled_back: AtomicU64,
    /// Transactions left in an unknown state.
    unknown: AtomicU64,
    /// Commits that reported a heuristic outcome.
    heuristic: AtomicU64,
    /// Commits that failed with an internal error.
    internal_errors: AtomicU64,
    /// Transactions marked rollback-only through a forced rollback.
    forced_rollbacks: AtomicU64,
}

impl CoordinatorStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_begin(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_forced_rollback(&self) {
        self.forced_rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Records how a completion ended. `status` is the final status.
    pub(crate) fn record_completion(&self, status: Status, error: Option<&CoordinatorError>) {
        let counter = match status {
            Status::Committed => &self.committed,
            Status::Unknown => &self.unknown,
            _ => &self.rolled_back,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        match error {
            Some(CoordinatorError::Heuristic(_)) => {
                self.heuristic.fetch_add(1, Ordering::Relaxed);
            }
            Some(CoordinatorError::Internal { .. }) => {
                self.internal_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    /// Returns the number of transactions begun.
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions committed.
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions rolled back.
    pub fn rolled_back(&self) -> u64 {
        self.rolled_back.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions whose outcome is unknown.
    pub fn unknown(&self) -> u64 {
        self.unknown.load(Ordering::Relaxed)
    }

    /// Returns the number of heuristic outcomes reported.
    pub fn heuristic(&self) -> u64 {
        self.heuristic.load(Ordering::Relaxed)
    }

    /// Returns the number of internal errors reported.
    pub fn internal_errors(&self) -> u64 {
        self.internal_errors.load(Ordering::Relaxed)
    }

    /// Returns the number of forced rollbacks.
    pub fn forced_rollbacks(&self) -> u64 {
        self.forced_rollbacks.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started: self.started(),
            committed: self.committed(),
            rolled_back: self.rolled_back(),
            unknown: self.unknown(),
            heuristic: self.heuristic(),
            internal_errors: self.internal_errors(),
            forced_rollbacks: self.forced_rollbacks(),
        }
    }
}

/// A point-in-time copy of [`CoordinatorStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatsSnapshot {
    /// Transactions begun.
    pub started: u64,
    /// Transactions committed.
    pub committed: u64,
    /// Transactions rolled back.
    pub rolled_back: u64,
    /// Transactions completed with a mixed or indeterminate outcome.
    #[cfg_attr(feature = "serde", serde(default))]
    pub unknown: u64,
    /// Heuristic outcomes reported.
    pub heuristic: u64,
    /// Internal errors reported.
    pub internal_errors: u64,
    /// Forced rollbacks requested.
    pub forced_rollbacks: u64,
}

impl StatsSnapshot {
    /// Transactions begun but not yet completed.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.started
            .saturating_sub(self.committed)
            .saturating_sub(self.rolled_back)
            .saturating_sub(self.unknown)
    }
}
