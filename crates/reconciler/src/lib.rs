//! Level-triggered control loop keeping managed resources in sync with an
//! external automation server.
//!
//! # Data flow
//!
//! ```text
//! ObjectStore -> Informer -> EventBridge -> WorkQueue -> WorkerPool -> Reconciler
//!      ^                                                                 |
//!      +------------------- annotations / finalizer ---------------------+
//! ```
//!
//! - **Informer**: lists then watches the store into an immutable-snapshot
//!   cache and reports when caches are synced
//! - **Event bridge**: turns cache changes into queue keys, with a periodic
//!   full resync
//! - **Work queue**: deduplicating, single-flight per key, exponential
//!   backoff on failure
//! - **Reconciler**: finalizer-guarded create/update, and two-phase delete
//! - **Worker pool**: bounded concurrency, panic and deadline isolation
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use steward_automation::InMemoryAutomationServer;
//! use steward_core::StewardConfig;
//! use steward_reconciler::{Controller, ShutdownCoordinator, TracingEventRecorder};
//! use steward_store::InMemoryObjectStore;
//!
//! #[tokio::main]
//! async fn main() -> steward_reconciler::Result<()> {
//!     let controller = Controller::new(
//!         InMemoryObjectStore::new_arc(),
//!         Arc::new(InMemoryAutomationServer::new()),
//!         Arc::new(TracingEventRecorder),
//!         StewardConfig::default(),
//!     )?;
//!     let shutdown = Arc::new(ShutdownCoordinator::new());
//!     controller.run(2, async { shutdown.wait().await; }).await
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod bridge;
pub mod controller;
pub mod error;
pub mod hash;
pub mod informer;
pub mod queue;
pub mod rate_limiter;
pub mod reconciler;
pub mod recorder;
pub mod shutdown;
pub mod worker;

pub use bridge::EventBridge;
pub use controller::Controller;
pub use error::{Error, ErrorClass, Result};
pub use hash::spec_hash;
pub use informer::{EventHandler, Informer, ResourceCache};
pub use queue::WorkQueue;
pub use rate_limiter::{BackoffLimiter, calculate_backoff};
pub use reconciler::{
    AUTO_SYNC_ANNOTATION, CLEANUP_FINALIZER, Reconcile, Reconciler, ReconcilerConfig,
    SPEC_HASH_ANNOTATION, SYNC_MESSAGE_ANNOTATION, SYNC_STATUS_ANNOTATION, SYNC_TIME_ANNOTATION,
    status,
};
pub use recorder::{
    EventRecorder, EventType, InMemoryEventRecorder, Reason, RecordedEvent, TracingEventRecorder,
};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal, install_signal_handlers};
pub use worker::WorkerPool;
