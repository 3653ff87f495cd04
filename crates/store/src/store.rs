//! Object store trait and in-memory implementation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{ManagedResource, ObjectKey, ResourceVersion, Selector};
use crate::watch::{WatchEvent, WatchStream};

/// Versioned, watchable storage for managed resources.
///
/// Reads return owned copies; writes are conditional on the resource
/// version carried by the object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one object.
    async fn get(&self, key: &ObjectKey) -> Result<Option<ManagedResource>>;

    /// List objects matching a selector.
    async fn list(&self, selector: &Selector) -> Result<Vec<ManagedResource>>;

    /// Subscribe to changes made after this call.
    fn watch(&self) -> WatchStream;

    /// Persist a new object.
    async fn create(&self, resource: ManagedResource) -> Result<ManagedResource>;

    /// Replace an object. Fails with `Error::Conflict` when the object's
    /// resource version is not the stored one.
    async fn update(&self, resource: ManagedResource) -> Result<ManagedResource>;

    /// Request deletion. Objects without finalizers disappear at once;
    /// otherwise the deletion marker is set and removal waits until the
    /// last finalizer is dropped by an update.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;
}

/// Default capacity of the watch broadcast buffer.
const WATCH_BUFFER: usize = 1024;

/// In-memory store with API-server semantics, for tests and demos.
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<ObjectKey, ManagedResource>>,
    version: AtomicU64,
    writes: AtomicU64,
    broadcast: broadcast::Sender<WatchEvent>,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::with_watch_buffer(WATCH_BUFFER)
    }
}

impl InMemoryObjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wrapped in an Arc.
    #[must_use]
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Create a store whose watchers lag after `capacity` unread events.
    #[must_use]
    pub fn with_watch_buffer(capacity: usize) -> Self {
        let (broadcast, _) = broadcast::channel(capacity.max(1));
        Self {
            objects: RwLock::new(BTreeMap::new()),
            version: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            broadcast,
        }
    }

    /// Number of successful create/update/delete calls so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of objects currently stored.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn next_version(&self) -> ResourceVersion {
        ResourceVersion::new(self.version.fetch_add(1, Ordering::AcqRel).saturating_add(1))
    }

    fn publish(&self, event: WatchEvent) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(key = %event.key(), kind = event.kind(), "Publishing store change");
        // No subscribers is not an error.
        let _ = self.broadcast.send(event);
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<ManagedResource>> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn list(&self, selector: &Selector) -> Result<Vec<ManagedResource>> {
        Ok(self
            .objects
            .read()
            .await
            .values()
            .filter(|r| selector.matches(r))
            .cloned()
            .collect())
    }

    fn watch(&self) -> WatchStream {
        WatchStream::new(self.broadcast.subscribe())
    }

    async fn create(&self, resource: ManagedResource) -> Result<ManagedResource> {
        let key = resource.key();
        if key.namespace().is_empty() || key.name().is_empty() {
            return Err(Error::invalid("namespace and name are required"));
        }

        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(Error::already_exists(key));
        }

        let stored = resource.persisted(
            self.next_version(),
            uuid::Uuid::new_v4().to_string(),
            Utc::now(),
            None,
        );
        objects.insert(key, stored.clone());
        drop(objects);

        self.publish(WatchEvent::Added(Arc::new(stored.clone())));
        Ok(stored)
    }

    async fn update(&self, resource: ManagedResource) -> Result<ManagedResource> {
        let key = resource.key();
        let mut objects = self.objects.write().await;
        let current = objects
            .get(&key)
            .ok_or_else(|| Error::not_found(key.clone()))?;

        let current_version = current.resource_version();
        if resource.resource_version() != current_version {
            return Err(Error::conflict(
                key,
                current_version.map_or_else(|| "none".to_string(), |v| v.to_string()),
                resource
                    .resource_version()
                    .map_or_else(|| "none".to_string(), |v| v.to_string()),
            ));
        }

        // Identity and deletion marker are owned by the store.
        let meta = current.metadata();
        let uid = meta.uid().unwrap_or_default().to_string();
        let created = meta.creation_timestamp().unwrap_or_else(Utc::now);
        let deleted = meta.deletion_timestamp();
        let stored = resource.persisted(self.next_version(), uid, created, deleted);

        let event = if stored.is_being_deleted() && !stored.has_finalizers() {
            objects.remove(&key);
            WatchEvent::Deleted(Arc::new(stored.clone()))
        } else {
            objects.insert(key, stored.clone());
            WatchEvent::Updated(Arc::new(stored.clone()))
        };
        drop(objects);

        self.publish(event);
        Ok(stored)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut objects = self.objects.write().await;
        let current = objects
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(key.clone()))?;

        if !current.has_finalizers() {
            objects.remove(key);
            drop(objects);
            self.publish(WatchEvent::Deleted(Arc::new(current)));
            return Ok(());
        }

        if current.is_being_deleted() {
            // Already terminating; nothing changes.
            return Ok(());
        }

        let meta = current.metadata();
        let uid = meta.uid().unwrap_or_default().to_string();
        let created = meta.creation_timestamp().unwrap_or_else(Utc::now);
        let marked = current.persisted(self.next_version(), uid, created, Some(Utc::now()));
        objects.insert(key.clone(), marked.clone());
        drop(objects);

        self.publish(WatchEvent::Updated(Arc::new(marked)));
        Ok(())
    }
}
