//! # txcoord testkit
//!
//! Test utilities for the txcoord transaction coordinator.
//!
//! This crate provides:
//! - Scripted XA resources that fail chosen calls with chosen codes
//! - Recording synchronizations
//! - A shared call log for asserting cross-participant ordering
//! - Property-based test generators using proptest
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txcoord_testkit::prelude::*;
//!
//! #[test]
//! fn two_phase_commit() {
//!     let tc = TestCoordinator::new();
//!     let tx = tc.begin().unwrap();
//!     tx.enlist_resource(tc.resource("r1").into_handle()).unwrap();
//!     tx.enlist_resource(tc.resource("r2").into_handle()).unwrap();
//!     tc.commit().unwrap();
//!     assert!(tc.log.position("r1:prepare") < tc.log.position("r1:commit"));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod resources;
pub mod stress;
pub mod synchronizations;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::resources::*;
    pub use crate::stress::*;
    pub use crate::synchronizations::*;
}

pub use fixtures::*;
pub use generators::*;
pub use resources::*;
pub use stress::*;
pub use synchronizations::*;
