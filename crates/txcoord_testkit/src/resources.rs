//! Scripted XA resources.
//!
//! A [`ScriptedResource`] fails chosen calls with chosen XA codes and logs
//! every call, optionally together with the status of a watched transaction
//! at the time of the call.

use crate::fixtures::{CallLog, Event, XaCall};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use txcoord_core::{
    EndFlag, ResourceManagerId, StartFlag, Transaction, TransactionHandle, Vote, XaError,
    XaErrorCode, XaResource, XaResult, Xid,
};

/// Which calls fail, and how.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    /// Error returned by `start`.
    pub start: Option<XaErrorCode>,
    /// Error returned by `end`.
    pub end: Option<XaErrorCode>,
    /// Error returned by `prepare`.
    pub prepare: Option<XaErrorCode>,
    /// Error returned by `commit`.
    pub commit: Option<XaErrorCode>,
    /// Error returned by `rollback`.
    pub rollback: Option<XaErrorCode>,
    /// Error returned by `forget`.
    pub forget: Option<XaErrorCode>,
    /// Vote read-only instead of commit.
    pub read_only: bool,
}

/// An XA resource driven by a [`Script`].
pub struct ScriptedResource {
    name: String,
    rm: ResourceManagerId,
    script: Script,
    log: CallLog,
    watched: Mutex<Option<Weak<Transaction>>>,
    forgets: AtomicUsize,
    heuristic_reported: AtomicBool,
}

impl ScriptedResource {
    /// Creates a healthy resource whose resource manager is named `name`.
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            rm: ResourceManagerId::new(name),
            script: Script::default(),
            log: log.clone(),
            watched: Mutex::new(None),
            forgets: AtomicUsize::new(0),
            heuristic_reported: AtomicBool::new(false),
        }
    }

    /// Uses `rm` as resource manager identity.
    #[must_use]
    pub fn resource_manager(mut self, rm: &str) -> Self {
        self.rm = ResourceManagerId::new(rm);
        self
    }

    /// Replaces the whole script.
    #[must_use]
    pub fn script(mut self, script: Script) -> Self {
        self.script = script;
        self
    }

    /// Fails `start` with `code`.
    #[must_use]
    pub fn fail_start(mut self, code: XaErrorCode) -> Self {
        self.script.start = Some(code);
        self
    }

    /// Fails `end` with `code`.
    #[must_use]
    pub fn fail_end(mut self, code: XaErrorCode) -> Self {
        self.script.end = Some(code);
        self
    }

    /// Fails `prepare` with `code`.
    #[must_use]
    pub fn fail_prepare(mut self, code: XaErrorCode) -> Self {
        self.script.prepare = Some(code);
        self
    }

    /// Fails `commit` with `code`.
    #[must_use]
    pub fn fail_commit(mut self, code: XaErrorCode) -> Self {
        self.script.commit = Some(code);
        self
    }

    /// Fails `rollback` with `code`.
    #[must_use]
    pub fn fail_rollback(mut self, code: XaErrorCode) -> Self {
        self.script.rollback = Some(code);
        self
    }

    /// Fails `forget` with `code`.
    #[must_use]
    pub fn fail_forget(mut self, code: XaErrorCode) -> Self {
        self.script.forget = Some(code);
        self
    }

    /// Votes read-only on `prepare`.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.script.read_only = true;
        self
    }

    /// Wraps the resource for enlistment.
    pub fn into_handle(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Logs the status of `transaction` with every subsequent call.
    pub fn watch(&self, transaction: &TransactionHandle) {
        *self.watched.lock() = Some(Arc::downgrade(transaction));
    }

    /// Returns the resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the calls made on this resource.
    pub fn calls(&self) -> Vec<XaCall> {
        self.log.calls_to(&self.name)
    }

    /// Returns true if `call` was made.
    pub fn received(&self, call: XaCall) -> bool {
        self.calls().contains(&call)
    }

    /// Returns true if `prepare` was called.
    pub fn was_prepared(&self) -> bool {
        self.received(XaCall::Prepare)
    }

    /// Returns true if `commit` was called in either form.
    pub fn was_committed(&self) -> bool {
        self.calls()
            .iter()
            .any(|call| matches!(call, XaCall::Commit { .. }))
    }

    /// Returns true if `rollback` was called.
    pub fn was_rolled_back(&self) -> bool {
        self.received(XaCall::Rollback)
    }

    /// Number of `forget` calls.
    pub fn forget_count(&self) -> usize {
        self.forgets.load(Ordering::SeqCst)
    }

    /// Returns true if any call returned a heuristic code.
    pub fn reported_heuristic(&self) -> bool {
        self.heuristic_reported.load(Ordering::SeqCst)
    }

    /// Returns true when `forget` was called exactly if a heuristic outcome
    /// was reported.
    pub fn forget_called_if_heuristic(&self) -> bool {
        self.reported_heuristic() == (self.forget_count() > 0)
    }

    fn log_call(&self, call: XaCall) {
        let status = self
            .watched
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|tx| tx.status());
        self.log.record(Event::Resource {
            name: self.name.clone(),
            call,
            status,
        });
    }

    fn outcome(&self, scripted: Option<XaErrorCode>) -> XaResult<()> {
        match scripted {
            Some(code) => {
                if code.is_heuristic() {
                    self.heuristic_reported.store(true, Ordering::SeqCst);
                }
                Err(XaError::new(code, format!("{} scripted failure", self.name)))
            }
            None => Ok(()),
        }
    }
}

impl XaResource for ScriptedResource {
    fn start(&self, _xid: &Xid, flag: StartFlag) -> XaResult<()> {
        self.log_call(XaCall::Start(flag));
        self.outcome(self.script.start)
    }

    fn end(&self, _xid: &Xid, flag: EndFlag) -> XaResult<()> {
        self.log_call(XaCall::End(flag));
        self.outcome(self.script.end)
    }

    fn prepare(&self, _xid: &Xid) -> XaResult<Vote> {
        self.log_call(XaCall::Prepare);
        self.outcome(self.script.prepare)?;
        Ok(if self.script.read_only {
            Vote::ReadOnly
        } else {
            Vote::Commit
        })
    }

    fn commit(&self, _xid: &Xid, one_phase: bool) -> XaResult<()> {
        self.log_call(XaCall::Commit { one_phase });
        self.outcome(self.script.commit)
    }

    fn rollback(&self, _xid: &Xid) -> XaResult<()> {
        self.log_call(XaCall::Rollback);
        self.outcome(self.script.rollback)
    }

    fn forget(&self, _xid: &Xid) -> XaResult<()> {
        self.log_call(XaCall::Forget);
        self.forgets.fetch_add(1, Ordering::SeqCst);
        self.outcome(self.script.forget)
    }

    fn resource_manager_id(&self) -> ResourceManagerId {
        self.rm.clone()
    }
}

impl std::fmt::Debug for ScriptedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedResource")
            .field("name", &self.name)
            .field("rm", &self.rm)
            .field("script", &self.script)
            .finish_non_exhaustive()
    }
}
