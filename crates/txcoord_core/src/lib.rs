//! # txcoord core
//!
//! XA transaction coordinator.
//!
//! This crate provides:
//! - Per-thread transaction demarcation with suspend/resume
//! - Two-phase commit with the one-phase optimization
//! - Heuristic outcome detection and aggregation
//! - Regular and interposed completion callbacks
//! - Transaction timeouts, monitoring and completion statistics
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use txcoord_core::{CoordinatorConfig, TransactionManager};
//!
//! let tm = Arc::new(TransactionManager::new(CoordinatorConfig::default()));
//! let tx = tm.begin()?;
//! tx.enlist_resource(orders_connection)?;
//! tx.enlist_resource(ledger_queue)?;
//! tm.commit()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod error;
mod manager;
mod outcome;
mod registry;
mod stats;
mod synchronization;
mod transaction;
mod types;
mod user_transaction;
mod xa;

pub use config::{CoordinatorConfig, ParticipationStrategy};
pub use context::TransactionManagerContext;
pub use error::{CoordinatorError, CoordinatorResult, HeuristicOutcome, SynchronizationError};
pub use manager::{TransactionManager, TransactionSummary};
pub use outcome::{resolve_commit, Failure, Outcome, OutcomeResolver, Resolution, Verdict};
pub use registry::TransactionSynchronizationRegistry;
pub use stats::{CoordinatorStats, StatsSnapshot};
pub use synchronization::{
    SyncKind, Synchronization, SynchronizationHandle, SynchronizationRegistry,
};
pub use transaction::{BranchInfo, BranchState, Transaction, TransactionHandle, TransactionResource};
pub use types::{Status, TransactionId, Xid};
pub use user_transaction::UserTransaction;
pub use xa::{
    EndFlag, EnlistmentListener, ResourceHandle, ResourceManagerId, StartFlag, UnknownXaCode,
    Vote, XaError, XaErrorCode, XaResource, XaResult,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
