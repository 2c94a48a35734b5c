//! Core type definitions for the coordinator.

use std::fmt;
use uuid::Uuid;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing within one manager and never
/// reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// XA transaction branch identifier.
///
/// The global part is shared by every branch of one transaction; the branch
/// qualifier distinguishes resource managers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    format_id: i32,
    global_id: Vec<u8>,
    branch_qualifier: Vec<u8>,
}

impl Xid {
    /// Format identifier used for branches created by this coordinator.
    pub const FORMAT_ID: i32 = 0x5458_4344;

    /// Creates an XID from its raw parts.
    pub fn new(format_id: i32, global_id: Vec<u8>, branch_qualifier: Vec<u8>) -> Self {
        Self {
            format_id,
            global_id,
            branch_qualifier,
        }
    }

    /// Generates a fresh global XID with an empty branch qualifier.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(
            Self::FORMAT_ID,
            Uuid::new_v4().as_bytes().to_vec(),
            Vec::new(),
        )
    }

    /// Returns the branch XID with the given branch number.
    #[must_use]
    pub fn branch(&self, branch: u32) -> Self {
        Self::new(
            self.format_id,
            self.global_id.clone(),
            branch.to_be_bytes().to_vec(),
        )
    }

    /// Returns the format identifier.
    #[must_use]
    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    /// Returns the global transaction id bytes.
    #[must_use]
    pub fn global_id(&self) -> &[u8] {
        &self.global_id
    }

    /// Returns the branch qualifier bytes.
    #[must_use]
    pub fn branch_qualifier(&self) -> &[u8] {
        &self.branch_qualifier
    }

    /// Returns true if both XIDs belong to the same global transaction.
    #[must_use]
    pub fn same_global(&self, other: &Xid) -> bool {
        self.format_id == other.format_id && self.global_id == other.global_id
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:", self.format_id)?;
        for byte in &self.global_id {
            write!(f, "{byte:02x}")?;
        }
        f.write_str(":")?;
        for byte in &self.branch_qualifier {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Status of a transaction as seen by callers and synchronizations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Status {
    /// No transaction is associated.
    NoTransaction,
    /// The transaction accepts work.
    Active,
    /// The transaction accepts work but can only roll back.
    MarkedRollback,
    /// Participants are being asked to prepare.
    Preparing,
    /// Every participant voted to commit.
    Prepared,
    /// Participants are being asked to commit.
    Committing,
    /// The transaction committed.
    Committed,
    /// Participants are being asked to roll back.
    RollingBack,
    /// The transaction rolled back.
    RolledBack,
    /// The outcome could not be determined.
    Unknown,
}

impl Status {
    /// Returns the display name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoTransaction => "NoTransaction",
            Self::Active => "Active",
            Self::MarkedRollback => "MarkedRollback",
            Self::Preparing => "Preparing",
            Self::Prepared => "Prepared",
            Self::Committing => "Committing",
            Self::Committed => "Committed",
            Self::RollingBack => "RollingBack",
            Self::RolledBack => "RolledBack",
            Self::Unknown => "Unknown",
        }
    }

    /// Returns true once no further state change is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::NoTransaction | Self::Committed | Self::RolledBack | Self::Unknown
        )
    }

    /// Returns true while the transaction still accepts enlistments and
    /// registrations.
    #[must_use]
    pub const fn accepts_work(self) -> bool {
        matches!(self, Self::Active | Self::MarkedRollback)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
