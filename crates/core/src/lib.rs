//! Core configuration, errors, and utilities for Steward.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod result;

pub use config::{AutomationSettings, BackoffSettings, ControllerSettings, StewardConfig};
pub use error::Error;
pub use result::{LogFailureExt, Result};
