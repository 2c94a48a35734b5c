//! Thread-to-transaction association.
//!
//! The context is the only process-wide mutable state of the coordinator.
//! It maps each thread to at most one transaction and keeps a table of live
//! transactions for monitoring.

use crate::transaction::{Transaction, TransactionHandle};
use crate::types::TransactionId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

/// Explicit association table shared by a manager and its transactions.
#[derive(Debug, Default)]
pub struct TransactionManagerContext {
    associations: RwLock<HashMap<ThreadId, TransactionHandle>>,
    live: RwLock<HashMap<TransactionId, Weak<Transaction>>>,
}

impl TransactionManagerContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the transaction associated with `thread`.
    pub fn current(&self, thread: ThreadId) -> Option<TransactionHandle> {
        self.associations.read().get(&thread).cloned()
    }

    /// Associates `transaction` with `thread`, replacing nothing.
    ///
    /// Returns false if the thread already had a transaction.
    pub fn associate(&self, thread: ThreadId, transaction: TransactionHandle) -> bool {
        let mut associations = self.associations.write();
        if associations.contains_key(&thread) {
            return false;
        }
        associations.insert(thread, transaction);
        true
    }

    /// Removes the association of `thread` and returns its transaction.
    pub fn disassociate_thread(&self, thread: ThreadId) -> Option<TransactionHandle> {
        self.associations.write().remove(&thread)
    }

    /// Removes every association pointing at the transaction `id`.
    pub fn disassociate_transaction(&self, id: TransactionId) {
        self.associations.write().retain(|_, tx| tx.id() != id);
    }

    /// Returns the thread `id` is associated with, if any.
    pub fn thread_of(&self, id: TransactionId) -> Option<ThreadId> {
        self.associations
            .read()
            .iter()
            .find(|(_, tx)| tx.id() == id)
            .map(|(thread, _)| *thread)
    }

    /// Number of associated threads.
    pub fn association_count(&self) -> usize {
        self.associations.read().len()
    }

    /// Adds a transaction to the live table, dropping entries whose
    /// transaction no longer exists.
    pub(crate) fn track(&self, transaction: &TransactionHandle) {
        let mut live = self.live.write();
        live.retain(|_, tx| tx.strong_count() > 0);
        live.insert(transaction.id(), Arc::downgrade(transaction));
    }

    /// Removes a transaction from the live table.
    pub(crate) fn untrack(&self, id: TransactionId) {
        self.live.write().remove(&id);
    }

    /// Looks up a live transaction by id.
    pub fn find(&self, id: TransactionId) -> Option<TransactionHandle> {
        self.live.read().get(&id).and_then(Weak::upgrade)
    }

    /// Returns every live transaction, ordered by id.
    ///
    /// Entries of transactions dropped without completing are pruned.
    pub fn live_transactions(&self) -> Vec<TransactionHandle> {
        let mut table = self.live.write();
        table.retain(|_, tx| tx.strong_count() > 0);
        let mut live: Vec<TransactionHandle> = table.values().filter_map(Weak::upgrade).collect();
        drop(table);
        live.sort_by_key(|tx| tx.id());
        live
    }
}
