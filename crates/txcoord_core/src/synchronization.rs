//! Completion callbacks.
//!
//! A transaction keeps two ordered lists of [`Synchronization`]s. Interposed
//! ones (registered by containers through the synchronization registry) wrap
//! the regular ones registered by application code: they run first on
//! `before_completion` and last on `after_completion`.

use crate::error::SynchronizationError;
use crate::types::Status;
use std::sync::Arc;
use tracing::warn;

/// Callbacks run around the completion of a transaction.
pub trait Synchronization: Send + Sync {
    /// Called before the two-phase commit starts.
    ///
    /// Returning an error forces the transaction to roll back; the error is
    /// reported as the cause of the rollback.
    fn before_completion(&self) -> Result<(), SynchronizationError>;

    /// Called once the outcome is known, with the final status.
    fn after_completion(&self, status: Status);
}

/// Shared handle to a registered synchronization.
pub type SynchronizationHandle = Arc<dyn Synchronization>;

/// Which list a synchronization belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// Registered through the synchronization registry.
    Interposed,
    /// Registered by application code on the transaction.
    Regular,
}

impl SyncKind {
    /// Invocation order for `before_completion`.
    pub const BEFORE_ORDER: [SyncKind; 2] = [SyncKind::Interposed, SyncKind::Regular];
}

/// The two callback lists of one transaction.
#[derive(Default)]
pub struct SynchronizationRegistry {
    interposed: Vec<SynchronizationHandle>,
    regular: Vec<SynchronizationHandle>,
}

impl SynchronizationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a synchronization to the given list.
    pub fn register(&mut self, kind: SyncKind, sync: SynchronizationHandle) {
        self.list_mut(kind).push(sync);
    }

    /// Returns the synchronization at `index` in the given list.
    #[must_use]
    pub fn get(&self, kind: SyncKind, index: usize) -> Option<SynchronizationHandle> {
        self.list(kind).get(index).cloned()
    }

    /// Number of synchronizations in the given list.
    #[must_use]
    pub fn len(&self, kind: SyncKind) -> usize {
        self.list(kind).len()
    }

    /// Returns true if neither list has entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interposed.is_empty() && self.regular.is_empty()
    }

    /// Every synchronization in `after_completion` order: regular first,
    /// then interposed.
    #[must_use]
    pub fn after_completion_order(&self) -> Vec<SynchronizationHandle> {
        self.regular
            .iter()
            .chain(self.interposed.iter())
            .cloned()
            .collect()
    }

    fn list(&self, kind: SyncKind) -> &Vec<SynchronizationHandle> {
        match kind {
            SyncKind::Interposed => &self.interposed,
            SyncKind::Regular => &self.regular,
        }
    }

    fn list_mut(&mut self, kind: SyncKind) -> &mut Vec<SynchronizationHandle> {
        match kind {
            SyncKind::Interposed => &mut self.interposed,
            SyncKind::Regular => &mut self.regular,
        }
    }
}

impl std::fmt::Debug for SynchronizationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizationRegistry")
            .field("interposed", &self.interposed.len())
            .field("regular", &self.regular.len())
            .finish()
    }
}

/// Runs `before_completion` over both lists.
///
/// `next` fetches the entry at a position so that callbacks may register
/// further synchronizations while the round runs; those are called too. A
/// raised error stops the rest of its own list, is passed to `on_error` and
/// the first one is returned. The other list still runs.
pub(crate) fn before_completion_round<N, E>(mut next: N, mut on_error: E) -> Option<SynchronizationError>
where
    N: FnMut(SyncKind, usize) -> Option<SynchronizationHandle>,
    E: FnMut(&SynchronizationError),
{
    let mut cause = None;
    for kind in SyncKind::BEFORE_ORDER {
        let mut index = 0;
        while let Some(sync) = next(kind, index) {
            index += 1;
            if let Err(err) = sync.before_completion() {
                warn!(?kind, error = %err, "before_completion failed");
                on_error(&err);
                cause.get_or_insert(err);
                break;
            }
        }
    }
    cause
}

/// Runs `after_completion` with the final status on every entry.
pub(crate) fn after_completion_round(syncs: &[SynchronizationHandle], status: Status) {
    for sync in syncs {
        sync.after_completion(status);
    }
}
