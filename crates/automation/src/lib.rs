//! Clients for the external automation server.
//!
//! The reconciler only sees [`ExternalSystemClient`]. Two backends ship:
//! [`JenkinsClient`] over HTTP and [`InMemoryAutomationServer`] for tests
//! and demos.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod client;
pub mod error;
pub mod jenkins;
pub mod memory;

pub use client::{ExternalEntity, ExternalName, ExternalSystemClient};
pub use error::{Error, Result};
pub use jenkins::{JenkinsClient, JenkinsConfig, render_config};
pub use memory::{InMemoryAutomationServer, Operation};
