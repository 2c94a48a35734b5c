//! Test fixtures and coordinator helpers.
//!
//! Provides a shared call log and a manager wrapper that hands out scripted
//! resources and recording synchronizations writing into that log.

use crate::resources::ScriptedResource;
use crate::synchronizations::RecordingSynchronization;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use txcoord_core::{
    CoordinatorConfig, EndFlag, EnlistmentListener, ParticipationStrategy, ResourceHandle,
    StartFlag, Status, Transaction, TransactionId, TransactionManager,
    TransactionSynchronizationRegistry, UserTransaction,
};

/// A call made on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaCall {
    /// `start` with its flag.
    Start(StartFlag),
    /// `end` with its flag.
    End(EndFlag),
    /// `prepare`.
    Prepare,
    /// `commit`, one-phase or not.
    Commit {
        /// Whether the one-phase optimization was used.
        one_phase: bool,
    },
    /// `rollback`.
    Rollback,
    /// `forget`.
    Forget,
}

/// One entry in a [`CallLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A resource was called while the transaction had `status`.
    Resource {
        /// Resource name.
        name: String,
        /// The call.
        call: XaCall,
        /// Transaction status observed during the call, when watched.
        status: Option<Status>,
    },
    /// `before_completion` was called.
    BeforeCompletion {
        /// Synchronization name.
        name: String,
    },
    /// `after_completion` was called with `status`.
    AfterCompletion {
        /// Synchronization name.
        name: String,
        /// Final status passed in.
        status: Status,
    },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource { name, call, .. } => match call {
                XaCall::Start(flag) => write!(f, "{name}:start({flag:?})"),
                XaCall::End(flag) => write!(f, "{name}:end({flag:?})"),
                XaCall::Prepare => write!(f, "{name}:prepare"),
                XaCall::Commit { one_phase: true } => write!(f, "{name}:commit(1pc)"),
                XaCall::Commit { one_phase: false } => write!(f, "{name}:commit"),
                XaCall::Rollback => write!(f, "{name}:rollback"),
                XaCall::Forget => write!(f, "{name}:forget"),
            },
            Self::BeforeCompletion { name } => write!(f, "{name}:before"),
            Self::AfterCompletion { name, status } => write!(f, "{name}:after({status})"),
        }
    }
}

/// Ordered record of every resource and synchronization call.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl CallLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn record(&self, event: Event) {
        self.events.lock().push(event);
    }

    /// Returns all events.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Returns all events rendered as short labels like `r1:prepare`.
    pub fn labels(&self) -> Vec<String> {
        self.events.lock().iter().map(ToString::to_string).collect()
    }

    /// Returns the calls made on the named resource.
    pub fn calls_to(&self, name: &str) -> Vec<XaCall> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Resource { name: n, call, .. } if n == name => Some(*call),
                _ => None,
            })
            .collect()
    }

    /// Returns the statuses observed by the named resource, in call order.
    pub fn statuses_seen_by(&self, name: &str) -> Vec<(XaCall, Status)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Resource {
                    name: n,
                    call,
                    status: Some(status),
                } if n == name => Some((*call, *status)),
                _ => None,
            })
            .collect()
    }

    /// Index of the first label equal to `label`.
    pub fn position(&self, label: &str) -> Option<usize> {
        self.labels().iter().position(|l| l == label)
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Forgets every recorded event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// A transaction manager paired with a call log.
pub struct TestCoordinator {
    /// The manager under test.
    pub tm: Arc<TransactionManager>,
    /// Log shared by every resource and synchronization handed out.
    pub log: CallLog,
}

impl TestCoordinator {
    /// Creates a coordinator with the default configuration.
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    /// Creates a coordinator that always runs both phases.
    pub fn two_phase() -> Self {
        Self::with_config(
            CoordinatorConfig::new().participation(ParticipationStrategy::TwoPhaseOnly),
        )
    }

    /// Creates a coordinator with the given configuration.
    pub fn with_config(config: CoordinatorConfig) -> Self {
        Self {
            tm: Arc::new(TransactionManager::new(config)),
            log: CallLog::new(),
        }
    }

    /// Returns a scripted resource builder logging into this coordinator's
    /// log. The resource manager identity defaults to the name.
    pub fn resource(&self, name: &str) -> ScriptedResource {
        ScriptedResource::new(name, &self.log)
    }

    /// Returns a recording synchronization builder.
    pub fn synchronization(&self, name: &str) -> RecordingSynchronization {
        RecordingSynchronization::new(name, &self.log)
    }

    /// Returns a user transaction over the manager.
    pub fn user_transaction(&self) -> UserTransaction {
        UserTransaction::new(Arc::clone(&self.tm))
    }

    /// Returns a synchronization registry over the manager.
    pub fn registry(&self) -> TransactionSynchronizationRegistry {
        self.tm.synchronization_registry()
    }
}

impl Default for TestCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestCoordinator {
    type Target = TransactionManager;

    fn deref(&self) -> &Self::Target {
        &self.tm
    }
}

/// Runs a test with a fresh coordinator.
///
/// # Example
///
/// ```rust,ignore
/// use txcoord_testkit::with_coordinator;
///
/// #[test]
/// fn my_test() {
///     with_coordinator(|tc| {
///         tc.begin().unwrap();
///         tc.commit().unwrap();
///     });
/// }
/// ```
pub fn with_coordinator<F, R>(f: F) -> R
where
    F: FnOnce(&TestCoordinator) -> R,
{
    let tc = TestCoordinator::new();
    f(&tc)
}

/// Enlistment listener that counts notifications.
#[derive(Debug, Default)]
pub struct CountingListener {
    count: AtomicUsize,
    transactions: Mutex<Vec<TransactionId>>,
}

impl CountingListener {
    /// Creates a new listener.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of notifications received.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Transactions notified, in order.
    pub fn transactions(&self) -> Vec<TransactionId> {
        self.transactions.lock().clone()
    }
}

impl EnlistmentListener for CountingListener {
    fn resource_enlisted(&self, transaction: &Transaction, _resource: &ResourceHandle) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.transactions.lock().push(transaction.id());
    }
}
