//! Application-facing transaction demarcation.

use crate::error::CoordinatorResult;
use crate::manager::TransactionManager;
use crate::types::Status;
use std::sync::Arc;

/// Begin/commit/rollback for application code, acting on the calling
/// thread's transaction.
#[derive(Debug, Clone)]
pub struct UserTransaction {
    manager: Arc<TransactionManager>,
}

impl UserTransaction {
    /// Creates an adapter over `manager`.
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self { manager }
    }

    /// Begins a transaction on the calling thread.
    pub fn begin(&self) -> CoordinatorResult<()> {
        self.manager.begin().map(|_| ())
    }

    /// Commits the calling thread's transaction.
    pub fn commit(&self) -> CoordinatorResult<()> {
        self.manager.commit()
    }

    /// Rolls back the calling thread's transaction.
    pub fn rollback(&self) -> CoordinatorResult<()> {
        self.manager.rollback()
    }

    /// Marks the calling thread's transaction rollback-only.
    pub fn set_rollback_only(&self) -> CoordinatorResult<()> {
        self.manager.set_rollback_only()
    }

    /// Returns the calling thread's transaction status.
    pub fn status(&self) -> Status {
        self.manager.status()
    }

    /// Sets the timeout, in seconds, of the next transaction begun on this
    /// thread. Zero restores the default.
    pub fn set_transaction_timeout(&self, seconds: u64) {
        self.manager.set_transaction_timeout(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoordinatorError;
    use std::time::Duration;

    #[test]
    fn delegates_to_manager() {
        let tm = Arc::new(TransactionManager::default());
        let ut = UserTransaction::new(Arc::clone(&tm));

        ut.begin().unwrap();
        assert_eq!(ut.status(), Status::Active);
        assert!(matches!(ut.begin(), Err(CoordinatorError::NestedTransaction)));
        ut.commit().unwrap();
        assert_eq!(ut.status(), Status::NoTransaction);
        assert_eq!(tm.stats().committed(), 1);
    }

    #[test]
    fn timeout_applies_to_next_begin_only() {
        let tm = Arc::new(TransactionManager::default());
        let ut = UserTransaction::new(Arc::clone(&tm));

        ut.begin().unwrap();
        ut.set_transaction_timeout(30);
        assert_eq!(tm.transaction().unwrap().timeout(), None);
        ut.rollback().unwrap();

        ut.begin().unwrap();
        assert_eq!(
            tm.transaction().unwrap().timeout(),
            Some(Duration::from_secs(30))
        );
        ut.set_rollback_only().unwrap();
        assert!(ut.commit().unwrap_err().is_rolled_back());
    }
}
