//! Managed resource model and versioned object store client.
//!
//! - **Types**: `ManagedResource` snapshots keyed by `ObjectKey`, carrying
//!   annotations, finalizers, a deletion marker and a `ResourceVersion`
//! - **Store**: the `ObjectStore` trait (get/list/watch/create/update/delete
//!   with optimistic concurrency) and an in-memory implementation
//! - **Watch**: typed `WatchEvent` streams
//! - **Manifests**: YAML loading for bootstrap and demos
//!
//! # Example
//!
//! ```ignore
//! use steward_store::{InMemoryObjectStore, ManagedResource, ObjectStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryObjectStore::new();
//!     let mut watch = store.watch();
//!
//!     let created = store
//!         .create(ManagedResource::new("ns1", "demo", serde_json::json!({})))
//!         .await?;
//!     let event = watch.recv().await?;
//!     println!("{} {}", event.kind(), event.key());
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod manifest;
pub mod store;
pub mod types;
pub mod watch;

pub use error::{Error, Result};
pub use manifest::parse_manifests;
pub use store::{InMemoryObjectStore, ObjectStore};
pub use types::{ManagedResource, ObjectKey, ObjectMeta, ResourceVersion, Selector};
pub use watch::{WatchError, WatchEvent, WatchStream};
