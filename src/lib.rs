#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # Steward
//!
//! Keeps automation server jobs in sync with declared resources.
//!
//! The binary is a thin shell over the workspace crates, re-exported here
//! for convenience.

pub use steward_automation;
pub use steward_core;
pub use steward_reconciler;
pub use steward_store;

pub mod cli;
pub mod commands;
