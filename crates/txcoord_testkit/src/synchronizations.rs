//! Recording synchronizations.

use crate::fixtures::{CallLog, Event};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use txcoord_core::{
    ResourceHandle, Status, Synchronization, SynchronizationError, SynchronizationHandle,
    Transaction, TransactionHandle,
};

/// What a [`RecordingSynchronization`] does in `before_completion`.
#[derive(Clone, Default)]
pub enum SyncBehavior {
    /// Nothing beyond logging.
    #[default]
    Pass,
    /// Raises an error with the given message.
    Raise(String),
    /// Marks the target transaction rollback-only without raising.
    SetRollbackOnly,
    /// Enlists a resource in the target transaction.
    Enlist(ResourceHandle),
    /// Registers another regular synchronization on the target transaction.
    Register(SynchronizationHandle),
}

/// A synchronization that logs its callbacks and optionally misbehaves.
pub struct RecordingSynchronization {
    name: String,
    log: CallLog,
    behavior: SyncBehavior,
    target: Mutex<Option<Weak<Transaction>>>,
    after: Mutex<Vec<Status>>,
    before_calls: Mutex<usize>,
}

impl RecordingSynchronization {
    /// Creates a pass-through synchronization.
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            behavior: SyncBehavior::Pass,
            target: Mutex::new(None),
            after: Mutex::new(Vec::new()),
            before_calls: Mutex::new(0),
        }
    }

    /// Raises `message` from `before_completion`.
    #[must_use]
    pub fn raising(mut self, message: &str) -> Self {
        self.behavior = SyncBehavior::Raise(message.to_string());
        self
    }

    /// Sets a behavior that acts on `transaction`.
    #[must_use]
    pub fn acting_on(mut self, transaction: &TransactionHandle, behavior: SyncBehavior) -> Self {
        self.behavior = behavior;
        *self.target.get_mut() = Some(Arc::downgrade(transaction));
        self
    }

    /// Wraps the synchronization for registration.
    pub fn into_handle(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Number of `before_completion` calls.
    pub fn before_count(&self) -> usize {
        *self.before_calls.lock()
    }

    /// Statuses passed to `after_completion`, in order.
    pub fn after_statuses(&self) -> Vec<Status> {
        self.after.lock().clone()
    }

    fn target(&self) -> Result<TransactionHandle, SynchronizationError> {
        self.target
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| SynchronizationError::new("target transaction is gone"))
    }
}

impl Synchronization for RecordingSynchronization {
    fn before_completion(&self) -> Result<(), SynchronizationError> {
        *self.before_calls.lock() += 1;
        self.log.record(Event::BeforeCompletion {
            name: self.name.clone(),
        });
        match &self.behavior {
            SyncBehavior::Pass => Ok(()),
            SyncBehavior::Raise(message) => Err(SynchronizationError::new(message.clone())),
            SyncBehavior::SetRollbackOnly => self
                .target()?
                .set_rollback_only()
                .map_err(|e| SynchronizationError::new(e.to_string())),
            SyncBehavior::Enlist(resource) => self
                .target()?
                .enlist_resource(Arc::clone(resource))
                .map_err(|e| SynchronizationError::new(e.to_string())),
            SyncBehavior::Register(sync) => self
                .target()?
                .register_synchronization(Arc::clone(sync))
                .map_err(|e| SynchronizationError::new(e.to_string())),
        }
    }

    fn after_completion(&self, status: Status) {
        self.after.lock().push(status);
        self.log.record(Event::AfterCompletion {
            name: self.name.clone(),
            status,
        });
    }
}

impl std::fmt::Debug for RecordingSynchronization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSynchronization")
            .field("name", &self.name)
            .field("before_calls", &self.before_count())
            .finish_non_exhaustive()
    }
}
