//! Synchronization registry for containers and frameworks.

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::manager::TransactionManager;
use crate::synchronization::SynchronizationHandle;
use crate::transaction::{TransactionHandle, TransactionResource};
use crate::types::{Status, TransactionId};
use std::sync::Arc;

/// Access to the calling thread's transaction for code that must not
/// demarcate it: interposed synchronizations, transaction-scoped values and
/// the rollback-only flag.
#[derive(Debug, Clone)]
pub struct TransactionSynchronizationRegistry {
    manager: Arc<TransactionManager>,
}

impl TransactionSynchronizationRegistry {
    /// Creates a registry bound to `manager`.
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self { manager }
    }

    /// Registers a synchronization that wraps the regular ones.
    pub fn register_interposed_synchronization(
        &self,
        sync: SynchronizationHandle,
    ) -> CoordinatorResult<()> {
        self.current("register a synchronization")?
            .register_interposed_synchronization(sync)
    }

    /// Returns the ID of the calling thread's transaction.
    pub fn transaction_key(&self) -> Option<TransactionId> {
        self.manager.transaction().map(|tx| tx.id())
    }

    /// Returns the calling thread's transaction status.
    pub fn transaction_status(&self) -> Status {
        self.manager.status()
    }

    /// Stores a value in the calling thread's transaction.
    pub fn put_resource(
        &self,
        key: impl Into<String>,
        value: TransactionResource,
    ) -> CoordinatorResult<()> {
        self.current("store a resource")?.put_resource(key, value)
    }

    /// Reads a value stored in the calling thread's transaction.
    pub fn get_resource(&self, key: &str) -> CoordinatorResult<Option<TransactionResource>> {
        Ok(self.current("read a resource")?.get_resource(key))
    }

    /// Marks the calling thread's transaction rollback-only.
    pub fn set_rollback_only(&self) -> CoordinatorResult<()> {
        self.manager.set_rollback_only()
    }

    /// Returns whether the calling thread's transaction is rollback-only.
    pub fn rollback_only(&self) -> CoordinatorResult<bool> {
        Ok(self.current("query rollback-only")?.is_rollback_only())
    }

    fn current(&self, operation: &str) -> CoordinatorResult<TransactionHandle> {
        self.manager.transaction().ok_or_else(|| {
            CoordinatorError::invalid_state(format!(
                "cannot {operation}: no transaction associated with this thread"
            ))
        })
    }
}
