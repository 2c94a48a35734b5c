//! Transaction state machine and completion protocol.
//!
//! A [`Transaction`] owns its enlisted resources and registered
//! synchronizations and drives them through two-phase commit. The internal
//! lock is never held while a resource or synchronization is called, so
//! callbacks may call back into the transaction.

use crate::config::ParticipationStrategy;
use crate::context::TransactionManagerContext;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::outcome::{resolve_commit, Outcome, OutcomeResolver, Resolution};
use crate::stats::CoordinatorStats;
use crate::synchronization::{
    after_completion_round, before_completion_round, SyncKind, SynchronizationHandle,
    SynchronizationRegistry,
};
use crate::types::{Status, TransactionId, Xid};
use crate::xa::{
    same_handle, EndFlag, EnlistmentListener, ResourceHandle, ResourceManagerId, StartFlag,
    Vote, XaResult,
};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// Shared handle to a transaction.
pub type TransactionHandle = Arc<Transaction>;

/// Value stored with [`Transaction::put_resource`].
pub type TransactionResource = Arc<dyn Any + Send + Sync>;

/// Association state of one resource handle with its branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    /// Started and doing work.
    Active,
    /// Suspended; may be resumed by re-enlisting.
    Suspended,
    /// Ended; still a participant in completion.
    Ended,
}

struct EnlistedHandle {
    handle: ResourceHandle,
    state: BranchState,
}

/// One completion participant: a resource manager branch and every handle
/// that joined it.
struct ResourceRecord {
    xid: Xid,
    resource_manager: ResourceManagerId,
    primary: ResourceHandle,
    handles: Vec<EnlistedHandle>,
    vote: Option<Vote>,
    outcome: Option<Outcome>,
    forgotten: bool,
}

/// Read-only view of a participant, for monitoring and diagnostics.
#[derive(Debug, Clone)]
pub struct BranchInfo {
    /// Branch identifier.
    pub xid: Xid,
    /// Resource manager identity.
    pub resource_manager: ResourceManagerId,
    /// Number of handles associated with the branch.
    pub handles: usize,
    /// Prepare vote, if the branch was prepared.
    pub vote: Option<Vote>,
    /// Outcome of the last completion call.
    pub outcome: Option<Outcome>,
    /// Whether `forget` was called.
    pub forgotten: bool,
}

struct TransactionInner {
    status: Status,
    rollback_only: bool,
    completing: bool,
    resources: Vec<ResourceRecord>,
    synchronizations: SynchronizationRegistry,
    user_resources: HashMap<String, TransactionResource>,
}

impl TransactionInner {
    fn mark_rollback_only(&mut self) {
        self.rollback_only = true;
        if self.status == Status::Active {
            self.status = Status::MarkedRollback;
        }
    }

    fn ensure_not_terminal(&self, operation: &str) -> CoordinatorResult<()> {
        if self.status.is_terminal() {
            return Err(CoordinatorError::invalid_state(format!(
                "cannot {operation}: transaction is {}",
                self.status
            )));
        }
        Ok(())
    }

    fn ensure_accepts_work(&self, operation: &str) -> CoordinatorResult<()> {
        self.ensure_not_terminal(operation)?;
        if !self.status.accepts_work() {
            return Err(CoordinatorError::invalid_state(format!(
                "cannot {operation}: transaction is {}",
                self.status
            )));
        }
        Ok(())
    }

    fn locate(&self, resource: &ResourceHandle) -> Option<(usize, usize)> {
        self.resources.iter().enumerate().find_map(|(r, record)| {
            record
                .handles
                .iter()
                .position(|h| same_handle(&h.handle, resource))
                .map(|h| (r, h))
        })
    }
}

/// Where a successfully started handle goes.
enum Slot {
    Existing(usize, usize),
    Joined(usize),
    New,
}

#[derive(Clone)]
struct Participant {
    index: usize,
    resource: ResourceHandle,
    xid: Xid,
}

/// Per-transaction settings chosen by the manager.
#[derive(Clone, Default)]
pub(crate) struct TransactionOptions {
    pub(crate) timeout: Option<Duration>,
    pub(crate) participation: ParticipationStrategy,
    pub(crate) listener: Option<Arc<dyn EnlistmentListener>>,
}

/// A global transaction.
pub struct Transaction {
    id: TransactionId,
    xid: Xid,
    created_at: SystemTime,
    started: Instant,
    timeout: Option<Duration>,
    participation: ParticipationStrategy,
    listener: Option<Arc<dyn EnlistmentListener>>,
    context: Weak<TransactionManagerContext>,
    stats: Arc<CoordinatorStats>,
    inner: Mutex<TransactionInner>,
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        options: TransactionOptions,
        context: &Arc<TransactionManagerContext>,
        stats: Arc<CoordinatorStats>,
    ) -> TransactionHandle {
        Arc::new(Self {
            id,
            xid: Xid::generate(),
            created_at: SystemTime::now(),
            started: Instant::now(),
            timeout: options.timeout,
            participation: options.participation,
            listener: options.listener,
            context: Arc::downgrade(context),
            stats,
            inner: Mutex::new(TransactionInner {
                status: Status::Active,
                rollback_only: false,
                completing: false,
                resources: Vec::new(),
                synchronizations: SynchronizationRegistry::new(),
                user_resources: HashMap::new(),
            }),
        })
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the global XID; branches derive their XIDs from it.
    #[must_use]
    pub fn xid(&self) -> &Xid {
        &self.xid
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.lock().status
    }

    /// Returns true if the transaction can only roll back.
    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.inner.lock().rollback_only
    }

    /// Wall-clock creation time.
    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Time since `begin()`.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// The timeout the transaction was started with.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns true if the timeout elapsed.
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        self.timeout.is_some_and(|t| self.elapsed() >= t)
    }

    /// Time left before the timeout, `None` without a timeout.
    #[must_use]
    pub fn remaining_timeout(&self) -> Option<Duration> {
        self.timeout.map(|t| t.saturating_sub(self.elapsed()))
    }

    /// Number of completion participants.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.inner.lock().resources.len()
    }

    /// Snapshot of every participant.
    #[must_use]
    pub fn branches(&self) -> Vec<BranchInfo> {
        self.inner
            .lock()
            .resources
            .iter()
            .map(|record| BranchInfo {
                xid: record.xid.clone(),
                resource_manager: record.resource_manager.clone(),
                handles: record.handles.len(),
                vote: record.vote,
                outcome: record.outcome.clone(),
                forgotten: record.forgotten,
            })
            .collect()
    }

    /// Marks the transaction so that its only possible outcome is rollback.
    pub fn set_rollback_only(&self) -> CoordinatorResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_not_terminal("set rollback-only")?;
        inner.mark_rollback_only();
        debug!(txn = %self.id, "marked rollback-only");
        Ok(())
    }

    /// Registers a regular synchronization.
    pub fn register_synchronization(&self, sync: SynchronizationHandle) -> CoordinatorResult<()> {
        self.register(SyncKind::Regular, sync)
    }

    /// Registers an interposed synchronization.
    pub fn register_interposed_synchronization(
        &self,
        sync: SynchronizationHandle,
    ) -> CoordinatorResult<()> {
        self.register(SyncKind::Interposed, sync)
    }

    fn register(&self, kind: SyncKind, sync: SynchronizationHandle) -> CoordinatorResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_accepts_work("register a synchronization")?;
        inner.synchronizations.register(kind, sync);
        Ok(())
    }

    /// Stores a value for the lifetime of the transaction.
    pub fn put_resource(
        &self,
        key: impl Into<String>,
        value: TransactionResource,
    ) -> CoordinatorResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_not_terminal("store a resource")?;
        inner.user_resources.insert(key.into(), value);
        Ok(())
    }

    /// Returns a value stored with [`Transaction::put_resource`].
    #[must_use]
    pub fn get_resource(&self, key: &str) -> Option<TransactionResource> {
        self.inner.lock().user_resources.get(key).cloned()
    }

    /// Enlists a resource in the transaction.
    ///
    /// Handles of a resource manager that already has a branch join that
    /// branch instead of becoming a new participant.
    pub fn enlist_resource(&self, resource: ResourceHandle) -> CoordinatorResult<()> {
        let (xid, flag, slot) = {
            let inner = self.inner.lock();
            inner.ensure_accepts_work("enlist a resource")?;
            if inner.rollback_only {
                return Err(CoordinatorError::rolled_back(
                    "transaction is marked for rollback",
                ));
            }
            match inner.locate(&resource) {
                Some((r, h)) => {
                    let record = &inner.resources[r];
                    let flag = match record.handles[h].state {
                        BranchState::Active => return Ok(()),
                        BranchState::Suspended => StartFlag::Resume,
                        BranchState::Ended => StartFlag::Join,
                    };
                    (record.xid.clone(), flag, Slot::Existing(r, h))
                }
                None => match inner
                    .resources
                    .iter()
                    .position(|record| record.primary.is_same_rm(resource.as_ref()))
                {
                    Some(r) => (inner.resources[r].xid.clone(), StartFlag::Join, Slot::Joined(r)),
                    None => {
                        let branch = u32::try_from(inner.resources.len() + 1).map_err(|_| {
                            CoordinatorError::invalid_state("too many branches")
                        })?;
                        (self.xid.branch(branch), StartFlag::NoFlags, Slot::New)
                    }
                },
            }
        };

        if let Err(err) = resource.start(&xid, flag) {
            warn!(txn = %self.id, %xid, code = %err.code, "resource failed to start");
            return Err(CoordinatorError::internal_xa(
                "resource could not be enlisted",
                err,
            ));
        }

        {
            let mut inner = self.inner.lock();
            match slot {
                Slot::Existing(r, h) => inner.resources[r].handles[h].state = BranchState::Active,
                Slot::Joined(r) => inner.resources[r].handles.push(EnlistedHandle {
                    handle: Arc::clone(&resource),
                    state: BranchState::Active,
                }),
                Slot::New => inner.resources.push(ResourceRecord {
                    xid: xid.clone(),
                    resource_manager: resource.resource_manager_id(),
                    primary: Arc::clone(&resource),
                    handles: vec![EnlistedHandle {
                        handle: Arc::clone(&resource),
                        state: BranchState::Active,
                    }],
                    vote: None,
                    outcome: None,
                    forgotten: false,
                }),
            }
        }
        debug!(txn = %self.id, %xid, ?flag, "resource enlisted");

        if let Some(listener) = &self.listener {
            listener.resource_enlisted(self, &resource);
        }
        Ok(())
    }

    /// Ends the association of a resource handle with its branch.
    ///
    /// The branch stays a completion participant. `EndFlag::Fail` also marks
    /// the transaction rollback-only. Handles that were never enlisted are
    /// ignored.
    pub fn delist_resource(&self, resource: &ResourceHandle, flag: EndFlag) -> CoordinatorResult<()> {
        let (xid, r, h) = {
            let inner = self.inner.lock();
            inner.ensure_accepts_work("delist a resource")?;
            let Some((r, h)) = inner.locate(resource) else {
                debug!(txn = %self.id, "delist of a resource that was never enlisted");
                return Ok(());
            };
            match (inner.resources[r].handles[h].state, flag) {
                (BranchState::Ended, _) | (BranchState::Suspended, EndFlag::Suspend) => {
                    return Ok(())
                }
                _ => {}
            }
            (inner.resources[r].xid.clone(), r, h)
        };

        let result = resource.end(&xid, flag);

        let mut inner = self.inner.lock();
        inner.resources[r].handles[h].state = match flag {
            EndFlag::Suspend => BranchState::Suspended,
            EndFlag::Success | EndFlag::Fail => BranchState::Ended,
        };
        if flag == EndFlag::Fail || result.is_err() {
            inner.mark_rollback_only();
        }
        drop(inner);

        result.map_err(|err| {
            warn!(txn = %self.id, %xid, code = %err.code, "resource failed to end");
            CoordinatorError::internal_xa("resource could not be delisted", err)
        })
    }

    /// Commits the transaction.
    ///
    /// On return the transaction is terminal and no longer associated with
    /// any thread, whatever the result.
    pub fn commit(&self) -> CoordinatorResult<()> {
        self.start_completion("commit")?;
        debug!(txn = %self.id, "commit requested");

        if self.is_timed_out() {
            warn!(txn = %self.id, "transaction timed out, rolling back");
            self.inner.lock().mark_rollback_only();
            self.roll_back_participants();
            return self.complete(
                Status::RolledBack,
                Err(CoordinatorError::rolled_back("transaction timed out")),
            );
        }

        if self.is_rollback_only() {
            self.roll_back_participants();
            return self.complete(
                Status::RolledBack,
                Err(CoordinatorError::rolled_back(
                    "transaction was marked for rollback",
                )),
            );
        }

        let cause = before_completion_round(
            |kind, index| self.inner.lock().synchronizations.get(kind, index),
            |_| self.inner.lock().mark_rollback_only(),
        );

        if !self.is_rollback_only() {
            self.end_branches(EndFlag::Success);
        }

        if self.is_rollback_only() {
            self.roll_back_participants();
            let reason = if cause.is_some() {
                "before completion failed"
            } else {
                "transaction was marked for rollback"
            };
            return self.complete(
                Status::RolledBack,
                Err(CoordinatorError::rolled_back_by(reason, cause)),
            );
        }

        let resolution = self.run_protocol();
        let status = resolution.status;
        self.complete(status, resolution.into_result())
    }

    /// Rolls the transaction back.
    ///
    /// Resource failures are logged and absorbed.
    pub fn rollback(&self) -> CoordinatorResult<()> {
        self.start_completion("roll back")?;
        debug!(txn = %self.id, "rollback requested");
        self.roll_back_participants();
        self.complete(Status::RolledBack, Ok(()))
    }

    fn start_completion(&self, operation: &str) -> CoordinatorResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_not_terminal(operation)?;
        if inner.completing {
            return Err(CoordinatorError::invalid_state(format!(
                "cannot {operation}: completion already in progress"
            )));
        }
        inner.completing = true;
        Ok(())
    }

    fn set_status(&self, status: Status) {
        self.inner.lock().status = status;
        debug!(txn = %self.id, %status, "status changed");
    }

    fn participants(&self) -> Vec<Participant> {
        self.inner
            .lock()
            .resources
            .iter()
            .enumerate()
            .map(|(index, record)| Participant {
                index,
                resource: Arc::clone(&record.primary),
                xid: record.xid.clone(),
            })
            .collect()
    }

    /// Ends every handle that is still associated.
    fn end_branches(&self, flag: EndFlag) {
        let pending: Vec<(ResourceHandle, Xid)> = {
            let mut inner = self.inner.lock();
            let mut pending = Vec::new();
            for record in &mut inner.resources {
                for handle in &mut record.handles {
                    if handle.state != BranchState::Ended {
                        handle.state = BranchState::Ended;
                        pending.push((Arc::clone(&handle.handle), record.xid.clone()));
                    }
                }
            }
            pending
        };

        for (resource, xid) in pending {
            if let Err(err) = resource.end(&xid, flag) {
                warn!(txn = %self.id, %xid, code = %err.code, "resource failed to end");
                if flag == EndFlag::Success {
                    self.inner.lock().mark_rollback_only();
                }
            }
        }
    }

    /// Two-phase commit over the enlisted participants.
    fn run_protocol(&self) -> Resolution {
        let participants = self.participants();

        if let [single] = participants.as_slice() {
            if self.participation == ParticipationStrategy::OnePhaseOptimized {
                self.set_status(Status::Committing);
                let outcomes = self.complete_phase(std::slice::from_ref(single), |p| {
                    p.resource.commit(&p.xid, true)
                });
                return resolve_commit(&outcomes);
            }
        }
        if participants.is_empty() {
            return Resolution::committed();
        }

        self.set_status(Status::Preparing);
        let mut committers = Vec::with_capacity(participants.len());
        let mut settled = Vec::new();
        for participant in &participants {
            let vote = participant.resource.prepare(&participant.xid);
            if let Ok(vote) = &vote {
                if let Some(record) = self.inner.lock().resources.get_mut(participant.index) {
                    record.vote = Some(*vote);
                }
            }
            match vote {
                Ok(Vote::Commit) => committers.push(participant.clone()),
                Ok(Vote::ReadOnly) => {
                    debug!(txn = %self.id, xid = %participant.xid, "participant voted read-only");
                    settled.push(participant.index);
                }
                Err(err) => {
                    warn!(
                        txn = %self.id,
                        xid = %participant.xid,
                        code = %err.code,
                        "prepare failed, rolling back"
                    );
                    if err.code.is_heuristic() {
                        self.forget(participant);
                        settled.push(participant.index);
                    }
                    self.record_outcome(
                        participant.index,
                        Outcome::Failed(err.clone()),
                        err.code.is_heuristic(),
                    );
                    self.set_status(Status::RollingBack);
                    // Read-only and heuristically completed voters have no
                    // branch left to roll back.
                    let rollback: Vec<Participant> = participants
                        .iter()
                        .filter(|p| !settled.contains(&p.index))
                        .cloned()
                        .collect();
                    self.complete_phase(&rollback, |p| p.resource.rollback(&p.xid));
                    return OutcomeResolver::resolve_vote_failure(&err);
                }
            }
        }

        self.set_status(Status::Prepared);
        if committers.is_empty() {
            return Resolution::committed();
        }

        self.set_status(Status::Committing);
        let outcomes = self.complete_phase(&committers, |p| p.resource.commit(&p.xid, false));
        resolve_commit(&outcomes)
    }

    fn roll_back_participants(&self) {
        self.set_status(Status::RollingBack);
        self.end_branches(EndFlag::Fail);
        let participants = self.participants();
        self.complete_phase(&participants, |p| p.resource.rollback(&p.xid));
    }

    /// Runs one completion call per participant, records the outcomes and
    /// forgets heuristically completed branches.
    fn complete_phase<F>(&self, participants: &[Participant], call: F) -> Vec<Outcome>
    where
        F: Fn(&Participant) -> XaResult<()>,
    {
        participants
            .iter()
            .map(|participant| {
                let outcome = Outcome::from(call(participant));
                if let Outcome::Failed(err) = &outcome {
                    warn!(
                        txn = %self.id,
                        xid = %participant.xid,
                        code = %err.code,
                        "participant reported failure"
                    );
                }
                let forgotten = outcome.is_heuristic();
                if forgotten {
                    self.forget(participant);
                }
                self.record_outcome(participant.index, outcome.clone(), forgotten);
                outcome
            })
            .collect()
    }

    fn record_outcome(&self, index: usize, outcome: Outcome, forgotten: bool) {
        if let Some(record) = self.inner.lock().resources.get_mut(index) {
            record.outcome = Some(outcome);
            record.forgotten |= forgotten;
        }
    }

    fn forget(&self, participant: &Participant) {
        match participant.resource.forget(&participant.xid) {
            Ok(()) => debug!(txn = %self.id, xid = %participant.xid, "heuristic branch forgotten"),
            Err(err) => warn!(
                txn = %self.id,
                xid = %participant.xid,
                code = %err.code,
                "forget failed"
            ),
        }
    }

    /// Sets the final status, runs `after_completion` and detaches the
    /// transaction from its context.
    fn complete(&self, status: Status, result: CoordinatorResult<()>) -> CoordinatorResult<()> {
        let syncs = {
            let mut inner = self.inner.lock();
            inner.status = status;
            inner.synchronizations.after_completion_order()
        };
        after_completion_round(&syncs, status);

        if let Some(context) = self.context.upgrade() {
            context.disassociate_transaction(self.id);
            context.untrack(self.id);
        }
        self.stats.record_completion(status, result.as_ref().err());

        match &result {
            Ok(()) => info!(txn = %self.id, %status, "transaction completed"),
            Err(err) => warn!(txn = %self.id, %status, error = %err, "transaction completed with failure"),
        }
        result
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("xid", &self.xid)
            .field("status", &inner.status)
            .field("rollback_only", &inner.rollback_only)
            .field("resources", &inner.resources.len())
            .field("synchronizations", &inner.synchronizations)
            .finish_non_exhaustive()
    }
}
