//! Transaction manager.

use crate::config::CoordinatorConfig;
use crate::context::TransactionManagerContext;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::registry::TransactionSynchronizationRegistry;
use crate::stats::CoordinatorStats;
use crate::transaction::{Transaction, TransactionHandle, TransactionOptions};
use crate::types::{Status, TransactionId};
use crate::xa::EnlistmentListener;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::debug;

/// Summary of a live transaction, for monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSummary {
    /// Transaction ID.
    pub id: TransactionId,
    /// Current status.
    pub status: Status,
    /// Time since `begin()`.
    pub elapsed: Duration,
    /// Number of completion participants.
    pub resource_count: usize,
    /// Whether a thread currently has the transaction.
    pub associated: bool,
}

/// Demarcates transactions on behalf of the calling thread.
///
/// Each thread has at most one associated transaction. `commit` and
/// `rollback` always leave the calling thread without a transaction.
pub struct TransactionManager {
    config: CoordinatorConfig,
    context: Arc<TransactionManagerContext>,
    stats: Arc<CoordinatorStats>,
    next_txid: AtomicU64,
    default_timeout: RwLock<Option<Duration>>,
    /// Per-thread overrides. An entry lives until its thread sets zero;
    /// entries of exited threads are never read again but are not pruned.
    thread_timeouts: RwLock<HashMap<ThreadId, Duration>>,
    listener: RwLock<Option<Arc<dyn EnlistmentListener>>>,
}

impl TransactionManager {
    /// Creates a manager with its own context.
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_context(config, Arc::new(TransactionManagerContext::new()))
    }

    /// Creates a manager over an existing context.
    pub fn with_context(config: CoordinatorConfig, context: Arc<TransactionManagerContext>) -> Self {
        let default_timeout = config.default_timeout;
        Self {
            config,
            context,
            stats: Arc::new(CoordinatorStats::new()),
            next_txid: AtomicU64::new(1),
            default_timeout: RwLock::new(default_timeout),
            thread_timeouts: RwLock::new(HashMap::new()),
            listener: RwLock::new(None),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Returns the association context.
    pub fn context(&self) -> &Arc<TransactionManagerContext> {
        &self.context
    }

    /// Returns the completion counters.
    pub fn stats(&self) -> &CoordinatorStats {
        &self.stats
    }

    /// Installs the hook notified on every successful enlistment.
    pub fn set_enlistment_listener(&self, listener: Option<Arc<dyn EnlistmentListener>>) {
        *self.listener.write() = listener;
    }

    /// Returns a synchronization registry bound to this manager.
    pub fn synchronization_registry(self: &Arc<Self>) -> TransactionSynchronizationRegistry {
        TransactionSynchronizationRegistry::new(Arc::clone(self))
    }

    /// Begins a transaction and associates it with the calling thread.
    pub fn begin(&self) -> CoordinatorResult<TransactionHandle> {
        let thread = thread::current().id();
        if self.context.current(thread).is_some() {
            return Err(CoordinatorError::NestedTransaction);
        }

        let id = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        let options = TransactionOptions {
            timeout: self.effective_timeout(thread),
            participation: self.config.participation,
            listener: self.listener.read().clone(),
        };
        let tx = Transaction::new(id, options, &self.context, Arc::clone(&self.stats));

        if !self.context.associate(thread, Arc::clone(&tx)) {
            return Err(CoordinatorError::NestedTransaction);
        }
        if self.config.monitoring {
            self.context.track(&tx);
        }
        self.stats.record_begin();
        debug!(txn = %id, timeout = ?tx.timeout(), "transaction begun");
        Ok(tx)
    }

    /// Returns the calling thread's transaction.
    pub fn transaction(&self) -> Option<TransactionHandle> {
        self.context.current(thread::current().id())
    }

    /// Returns the calling thread's transaction status, `NoTransaction` if
    /// it has none.
    pub fn status(&self) -> Status {
        self.transaction()
            .map_or(Status::NoTransaction, |tx| tx.status())
    }

    /// Commits the calling thread's transaction.
    pub fn commit(&self) -> CoordinatorResult<()> {
        let tx = self.require_current("commit")?;
        let result = tx.commit();
        self.context.disassociate_thread(thread::current().id());
        result
    }

    /// Rolls back the calling thread's transaction.
    pub fn rollback(&self) -> CoordinatorResult<()> {
        let tx = self.require_current("roll back")?;
        let result = tx.rollback();
        self.context.disassociate_thread(thread::current().id());
        result
    }

    /// Marks the calling thread's transaction rollback-only.
    pub fn set_rollback_only(&self) -> CoordinatorResult<()> {
        self.require_current("set rollback-only")?.set_rollback_only()
    }

    /// Detaches the calling thread's transaction and returns it untouched.
    pub fn suspend(&self) -> Option<TransactionHandle> {
        let tx = self.context.disassociate_thread(thread::current().id());
        if let Some(tx) = &tx {
            debug!(txn = %tx.id(), "transaction suspended");
        }
        tx
    }

    /// Associates a suspended transaction with the calling thread.
    pub fn resume(&self, transaction: Option<TransactionHandle>) -> CoordinatorResult<()> {
        let thread = thread::current().id();
        if self.context.current(thread).is_some() {
            return Err(CoordinatorError::invalid_state(
                "thread already has a transaction",
            ));
        }
        let Some(tx) = transaction else {
            return Err(CoordinatorError::invalid_reference("no transaction given"));
        };
        if tx.status().is_terminal() {
            return Err(CoordinatorError::invalid_reference(format!(
                "{} has completed",
                tx.id()
            )));
        }
        if self.context.thread_of(tx.id()).is_some() {
            return Err(CoordinatorError::invalid_state(format!(
                "{} is associated with another thread",
                tx.id()
            )));
        }
        let id = tx.id();
        if !self.context.associate(thread, tx) {
            return Err(CoordinatorError::invalid_state(
                "thread already has a transaction",
            ));
        }
        debug!(txn = %id, "transaction resumed");
        Ok(())
    }

    /// Sets the timeout for transactions the calling thread begins next.
    /// Zero restores the default and drops the thread's entry.
    pub fn set_transaction_timeout(&self, seconds: u64) {
        let thread = thread::current().id();
        let mut timeouts = self.thread_timeouts.write();
        if seconds == 0 {
            timeouts.remove(&thread);
        } else {
            timeouts.insert(thread, Duration::from_secs(seconds));
        }
    }

    /// Sets the timeout used when a thread set none. Zero disables it.
    pub fn set_default_transaction_timeout(&self, seconds: u64) {
        *self.default_timeout.write() = (seconds > 0).then(|| Duration::from_secs(seconds));
    }

    /// Returns the timeout a transaction begun by `thread` would get.
    pub fn effective_timeout(&self, thread: ThreadId) -> Option<Duration> {
        if let Some(timeout) = self.thread_timeouts.read().get(&thread) {
            return Some(*timeout);
        }
        *self.default_timeout.read()
    }

    /// Lists live transactions. Empty when monitoring is disabled.
    pub fn active_transactions(&self) -> Vec<TransactionSummary> {
        self.context
            .live_transactions()
            .into_iter()
            .map(|tx| TransactionSummary {
                id: tx.id(),
                status: tx.status(),
                elapsed: tx.elapsed(),
                resource_count: tx.resource_count(),
                associated: self.context.thread_of(tx.id()).is_some(),
            })
            .collect()
    }

    /// Marks a live transaction rollback-only from any thread.
    pub fn force_rollback(&self, id: TransactionId) -> CoordinatorResult<()> {
        let tx = self
            .context
            .find(id)
            .ok_or_else(|| CoordinatorError::invalid_reference(format!("{id} is not live")))?;
        tx.set_rollback_only()?;
        self.stats.record_forced_rollback();
        Ok(())
    }

    fn require_current(&self, operation: &str) -> CoordinatorResult<TransactionHandle> {
        self.transaction().ok_or_else(|| {
            CoordinatorError::invalid_state(format!(
                "cannot {operation}: no transaction associated with this thread"
            ))
        })
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default())
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("config", &self.config)
            .field("associations", &self.context.association_count())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_commit_lifecycle() {
        let tm = TransactionManager::default();
        assert_eq!(tm.status(), Status::NoTransaction);

        let tx = tm.begin().unwrap();
        assert_eq!(tm.status(), Status::Active);
        tm.commit().unwrap();

        assert_eq!(tx.status(), Status::Committed);
        assert_eq!(tm.status(), Status::NoTransaction);
        assert!(tm.transaction().is_none());
    }

    #[test]
    fn rollback_lifecycle() {
        let tm = TransactionManager::default();
        let tx = tm.begin().unwrap();
        tm.rollback().unwrap();
        assert_eq!(tx.status(), Status::RolledBack);
        assert_eq!(tm.status(), Status::NoTransaction);
    }

    #[test]
    fn nested_begin_is_rejected() {
        let tm = TransactionManager::default();
        tm.begin().unwrap();
        assert!(matches!(tm.begin(), Err(CoordinatorError::NestedTransaction)));
    }

    #[test]
    fn operations_without_transaction_are_invalid() {
        let tm = TransactionManager::default();
        assert!(matches!(tm.commit(), Err(CoordinatorError::InvalidState { .. })));
        assert!(matches!(tm.rollback(), Err(CoordinatorError::InvalidState { .. })));
        assert!(matches!(
            tm.set_rollback_only(),
            Err(CoordinatorError::InvalidState { .. })
        ));
    }

    #[test]
    fn set_rollback_only_keeps_association() {
        let tm = TransactionManager::default();
        tm.begin().unwrap();
        tm.set_rollback_only().unwrap();
        assert_eq!(tm.status(), Status::MarkedRollback);
        assert!(tm.commit().unwrap_err().is_rolled_back());
        assert_eq!(tm.status(), Status::NoTransaction);
    }

    #[test]
    fn suspend_and_resume() {
        let tm = TransactionManager::default();
        let tx = tm.begin().unwrap();
        let suspended = tm.suspend().unwrap();
        assert!(Arc::ptr_eq(&tx, &suspended));
        assert_eq!(tm.status(), Status::NoTransaction);
        assert!(tm.suspend().is_none());

        tm.resume(Some(suspended)).unwrap();
        assert_eq!(tm.status(), Status::Active);
    }

    #[test]
    fn resume_rejects_bad_references() {
        let tm = TransactionManager::default();
        assert!(matches!(
            tm.resume(None),
            Err(CoordinatorError::InvalidTransactionReference { .. })
        ));

        let tx = tm.begin().unwrap();
        tm.commit().unwrap();
        assert!(matches!(
            tm.resume(Some(tx)),
            Err(CoordinatorError::InvalidTransactionReference { .. })
        ));
    }

    #[test]
    fn resume_while_associated_is_invalid() {
        let tm = TransactionManager::default();
        let first = tm.begin().unwrap();
        let suspended = tm.suspend().unwrap();
        tm.begin().unwrap();
        assert!(matches!(
            tm.resume(Some(suspended)),
            Err(CoordinatorError::InvalidState { .. })
        ));
        assert_eq!(first.status(), Status::Active);
    }

    #[test]
    fn thread_timeout_overrides_default() {
        let tm = TransactionManager::new(
            CoordinatorConfig::new().default_timeout(Some(Duration::from_secs(60))),
        );
        let thread = thread::current().id();
        assert_eq!(tm.effective_timeout(thread), Some(Duration::from_secs(60)));

        tm.set_transaction_timeout(5);
        assert_eq!(tm.begin().unwrap().timeout(), Some(Duration::from_secs(5)));
        tm.rollback().unwrap();

        tm.set_transaction_timeout(0);
        tm.set_default_transaction_timeout(0);
        assert_eq!(tm.effective_timeout(thread), None);
    }

    #[test]
    fn sub_second_default_timeout_is_kept() {
        let tm = TransactionManager::new(
            CoordinatorConfig::new().default_timeout(Some(Duration::from_millis(1500))),
        );
        let thread = thread::current().id();
        assert_eq!(tm.effective_timeout(thread), Some(Duration::from_millis(1500)));

        let tm = TransactionManager::new(
            CoordinatorConfig::new().default_timeout(Some(Duration::from_millis(500))),
        );
        assert_eq!(tm.begin().unwrap().timeout(), Some(Duration::from_millis(500)));
        tm.rollback().unwrap();
    }

    #[test]
    fn monitoring_tracks_live_transactions() {
        let tm = TransactionManager::default();
        let tx = tm.begin().unwrap();
        let active = tm.active_transactions();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, tx.id());
        assert!(active[0].associated);

        tm.force_rollback(tx.id()).unwrap();
        assert_eq!(tx.status(), Status::MarkedRollback);
        assert!(tm.commit().unwrap_err().is_rolled_back());
        assert!(tm.active_transactions().is_empty());
        assert_eq!(tm.stats().forced_rollbacks(), 1);
    }

    #[test]
    fn monitoring_disabled_tracks_nothing() {
        let tm = TransactionManager::new(CoordinatorConfig::new().monitoring(false));
        let tx = tm.begin().unwrap();
        assert!(tm.active_transactions().is_empty());
        assert!(matches!(
            tm.force_rollback(tx.id()),
            Err(CoordinatorError::InvalidTransactionReference { .. })
        ));
    }
}
