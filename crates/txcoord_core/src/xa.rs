//! XA resource contract.
//!
//! Resource managers (database connections, message brokers, ...) take part
//! in a transaction through [`XaResource`]. The coordinator only ever talks to
//! resources through this trait.

use crate::transaction::Transaction;
use crate::types::Xid;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Shared handle to an enlisted resource.
pub type ResourceHandle = Arc<dyn XaResource>;

/// Result type for resource calls.
pub type XaResult<T> = Result<T, XaError>;

/// XA return codes a resource can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum XaErrorCode {
    /// The branch was rolled back for an unspecified reason.
    RbRollback,
    /// The branch was rolled back after a communication failure.
    RbCommFail,
    /// The branch was rolled back after a deadlock.
    RbDeadlock,
    /// The branch was rolled back after an integrity violation.
    RbIntegrity,
    /// The branch was rolled back for a reason not on this list.
    RbOther,
    /// The branch was rolled back after a protocol error in the RM.
    RbProto,
    /// The branch took too long and was rolled back.
    RbTimeout,
    /// The branch may be retried after rollback.
    RbTransient,
    /// The branch was heuristically committed and rolled back in parts.
    HeurMix,
    /// The branch was heuristically rolled back.
    HeurRb,
    /// The branch was heuristically committed.
    HeurCom,
    /// The branch may have been heuristically completed.
    HeurHaz,
    /// The branch did no updates and has already been released.
    RdOnly,
    /// The RM could not do the work now; the call may be retried.
    Retry,
    /// An asynchronous operation is already outstanding.
    Async,
    /// A resource manager error occurred in the branch.
    RmErr,
    /// The XID is not valid.
    NoTa,
    /// Invalid arguments were given.
    Inval,
    /// The routine was invoked in an improper context.
    Proto,
    /// The resource manager is unavailable.
    RmFail,
    /// The XID already exists.
    DupId,
    /// The RM is doing work outside a global transaction.
    Outside,
}

impl XaErrorCode {
    /// Every code, in numeric order of the protocol constants.
    pub const ALL: [XaErrorCode; 22] = [
        Self::Outside,
        Self::DupId,
        Self::RmFail,
        Self::Proto,
        Self::Inval,
        Self::NoTa,
        Self::RmErr,
        Self::Async,
        Self::RdOnly,
        Self::Retry,
        Self::HeurMix,
        Self::HeurRb,
        Self::HeurCom,
        Self::HeurHaz,
        Self::RbRollback,
        Self::RbCommFail,
        Self::RbDeadlock,
        Self::RbIntegrity,
        Self::RbOther,
        Self::RbProto,
        Self::RbTimeout,
        Self::RbTransient,
    ];

    /// Returns the numeric XA constant.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::RbRollback => 100,
            Self::RbCommFail => 101,
            Self::RbDeadlock => 102,
            Self::RbIntegrity => 103,
            Self::RbOther => 104,
            Self::RbProto => 105,
            Self::RbTimeout => 106,
            Self::RbTransient => 107,
            Self::HeurHaz => 8,
            Self::HeurCom => 7,
            Self::HeurRb => 6,
            Self::HeurMix => 5,
            Self::Retry => 4,
            Self::RdOnly => 3,
            Self::Async => -2,
            Self::RmErr => -3,
            Self::NoTa => -4,
            Self::Inval => -5,
            Self::Proto => -6,
            Self::RmFail => -7,
            Self::DupId => -8,
            Self::Outside => -9,
        }
    }

    /// Looks up a code by its numeric XA constant.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Returns the conventional XA name, e.g. `XA_HEURRB` or `XAER_RMFAIL`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RbRollback => "XA_RBROLLBACK",
            Self::RbCommFail => "XA_RBCOMMFAIL",
            Self::RbDeadlock => "XA_RBDEADLOCK",
            Self::RbIntegrity => "XA_RBINTEGRITY",
            Self::RbOther => "XA_RBOTHER",
            Self::RbProto => "XA_RBPROTO",
            Self::RbTimeout => "XA_RBTIMEOUT",
            Self::RbTransient => "XA_RBTRANSIENT",
            Self::HeurMix => "XA_HEURMIX",
            Self::HeurRb => "XA_HEURRB",
            Self::HeurCom => "XA_HEURCOM",
            Self::HeurHaz => "XA_HEURHAZ",
            Self::RdOnly => "XA_RDONLY",
            Self::Retry => "XA_RETRY",
            Self::Async => "XAER_ASYNC",
            Self::RmErr => "XAER_RMERR",
            Self::NoTa => "XAER_NOTA",
            Self::Inval => "XAER_INVAL",
            Self::Proto => "XAER_PROTO",
            Self::RmFail => "XAER_RMFAIL",
            Self::DupId => "XAER_DUPID",
            Self::Outside => "XAER_OUTSIDE",
        }
    }

    /// Returns true for the `XA_RB*` range.
    #[must_use]
    pub const fn is_rollback(self) -> bool {
        matches!(
            self,
            Self::RbRollback
                | Self::RbCommFail
                | Self::RbDeadlock
                | Self::RbIntegrity
                | Self::RbOther
                | Self::RbProto
                | Self::RbTimeout
                | Self::RbTransient
        )
    }

    /// Returns true for codes reporting a heuristic decision.
    #[must_use]
    pub const fn is_heuristic(self) -> bool {
        matches!(
            self,
            Self::HeurMix | Self::HeurRb | Self::HeurCom | Self::HeurHaz
        )
    }

    /// Returns true for `XAER_*` codes signalling a protocol or availability
    /// failure that says nothing about the branch outcome.
    #[must_use]
    pub const fn is_protocol(self) -> bool {
        matches!(
            self,
            Self::Async
                | Self::Inval
                | Self::Proto
                | Self::RmFail
                | Self::DupId
                | Self::Outside
                | Self::Retry
        )
    }
}

impl fmt::Display for XaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown XA code name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown XA code: {0}")]
pub struct UnknownXaCode(pub String);

impl FromStr for XaErrorCode {
    type Err = UnknownXaCode;

    /// Accepts the full name (`XAER_RMFAIL`) or the bare suffix (`rmfail`),
    /// case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|code| {
                let name = code.name();
                name == wanted
                    || name
                        .split_once('_')
                        .is_some_and(|(_, suffix)| suffix == wanted)
            })
            .ok_or_else(|| UnknownXaCode(s.to_string()))
    }
}

/// Error reported by a resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct XaError {
    /// The XA return code.
    pub code: XaErrorCode,
    /// Resource-specific detail.
    pub message: String,
}

impl XaError {
    /// Creates a new resource error.
    pub fn new(code: XaErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<XaErrorCode> for XaError {
    fn from(code: XaErrorCode) -> Self {
        Self::new(code, code.name())
    }
}

/// A participant's answer to `prepare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// Ready to commit.
    Commit,
    /// Did no updates; takes no part in the second phase.
    ReadOnly,
}

/// Flag passed to [`XaResource::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFlag {
    /// Start a new branch.
    NoFlags,
    /// Join a branch already started by the same resource manager.
    Join,
    /// Resume a suspended association.
    Resume,
}

/// Flag passed to [`XaResource::end`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndFlag {
    /// The work completed successfully.
    Success,
    /// The work failed; the branch must roll back.
    Fail,
    /// The association is suspended and may be resumed.
    Suspend,
}

/// Identity of a resource manager.
///
/// Two handles reporting the same identity belong to the same branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceManagerId(String);

impl ResourceManagerId {
    /// Creates a resource manager identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The XA participant contract.
pub trait XaResource: Send + Sync {
    /// Associates the resource with the branch.
    fn start(&self, xid: &Xid, flag: StartFlag) -> XaResult<()>;

    /// Ends or suspends the association with the branch.
    fn end(&self, xid: &Xid, flag: EndFlag) -> XaResult<()>;

    /// Asks the resource to prepare the branch.
    fn prepare(&self, xid: &Xid) -> XaResult<Vote>;

    /// Commits the branch, in one phase when `one_phase` is set.
    fn commit(&self, xid: &Xid, one_phase: bool) -> XaResult<()>;

    /// Rolls the branch back.
    fn rollback(&self, xid: &Xid) -> XaResult<()>;

    /// Discards a heuristically completed branch.
    fn forget(&self, xid: &Xid) -> XaResult<()>;

    /// Returns the identity of the resource manager behind this handle.
    fn resource_manager_id(&self) -> ResourceManagerId;

    /// Returns true if `other` is served by the same resource manager.
    fn is_same_rm(&self, other: &dyn XaResource) -> bool {
        self.resource_manager_id() == other.resource_manager_id()
    }
}

/// Hook notified whenever a resource joins a transaction.
///
/// Connection pools use it to tie a pooled connection to the transaction
/// that enlisted it.
pub trait EnlistmentListener: Send + Sync {
    /// Called after `resource` was successfully enlisted in `transaction`.
    fn resource_enlisted(&self, transaction: &Transaction, resource: &ResourceHandle);
}

/// Returns true if both handles point at the same resource object.
pub(crate) fn same_handle(a: &ResourceHandle, b: &ResourceHandle) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
