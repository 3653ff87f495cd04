//! List-then-watch cache of managed resources.
//!
//! The informer subscribes to the store's watch before listing, so nothing
//! written between the list and the first event is missed. Cached entries
//! are immutable snapshots; readers get an `Arc` and never see a partial
//! write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use steward_store::{
    ManagedResource, ObjectKey, ObjectStore, ResourceVersion, Selector, WatchError, WatchEvent,
};
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::shutdown::until_true;

const LIST_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Receives cache changes from the informer.
pub trait EventHandler: Send + Sync {
    /// A key entered the cache.
    fn on_add(&self, object: &ManagedResource);
    /// A cached key was written.
    fn on_update(&self, old: &ManagedResource, new: &ManagedResource);
    /// A key left the cache.
    fn on_delete(&self, object: &ManagedResource);
    /// A periodic resync visited an unchanged key.
    fn on_resync(&self, object: &ManagedResource);
}

/// Shared read model keyed by object identity.
#[derive(Clone, Default)]
pub struct ResourceCache {
    objects: Arc<RwLock<HashMap<ObjectKey, Arc<ManagedResource>>>>,
}

impl ResourceCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of `key`, if cached.
    pub async fn get(&self, key: &ObjectKey) -> Option<Arc<ManagedResource>> {
        self.objects.read().await.get(key).cloned()
    }

    /// All cached keys.
    pub async fn keys(&self) -> Vec<ObjectKey> {
        self.objects.read().await.keys().cloned().collect()
    }

    /// Number of cached objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Store `object` unless the cache already holds a newer version.
    /// Returns the previous entry.
    async fn upsert(&self, object: Arc<ManagedResource>) -> Upsert {
        let mut objects = self.objects.write().await;
        let key = object.key();
        match objects.get(&key) {
            Some(current) if current.resource_version() > object.resource_version() => {
                Upsert::Stale
            }
            _ => objects
                .insert(key, object)
                .map_or(Upsert::Added, Upsert::Replaced),
        }
    }

    /// Drop `object` unless the cache holds a newer incarnation of its key.
    /// Returns whether an entry was removed.
    async fn remove(&self, object: &ManagedResource) -> bool {
        let mut objects = self.objects.write().await;
        let key = object.key();
        match objects.get(&key) {
            Some(current) if current.resource_version() > object.resource_version() => false,
            _ => objects.remove(&key).is_some(),
        }
    }

    async fn versions(&self) -> HashMap<ObjectKey, Option<ResourceVersion>> {
        self.objects
            .read()
            .await
            .iter()
            .map(|(key, object)| (key.clone(), object.resource_version()))
            .collect()
    }

    /// Drop `key` only if it still holds `version`.
    async fn remove_if_unchanged(
        &self,
        key: &ObjectKey,
        version: Option<ResourceVersion>,
    ) -> Option<Arc<ManagedResource>> {
        let mut objects = self.objects.write().await;
        match objects.get(key) {
            Some(current) if current.resource_version() == version => objects.remove(key),
            _ => None,
        }
    }
}

enum Upsert {
    Added,
    Replaced(Arc<ManagedResource>),
    Stale,
}

/// Lists and watches the store, keeping a [`ResourceCache`] current and
/// telling an [`EventHandler`] about every change.
pub struct Informer {
    store: Arc<dyn ObjectStore>,
    selector: Selector,
    cache: ResourceCache,
    synced: watch::Sender<bool>,
}

impl Informer {
    /// Create an informer over the objects matching `selector`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, selector: Selector) -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            store,
            selector,
            cache: ResourceCache::new(),
            synced,
        }
    }

    /// The cache this informer fills.
    #[must_use]
    pub const fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// Whether the initial list has completed.
    #[must_use]
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Readiness signal; flips to `true` once caches are synced.
    #[must_use]
    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.synced.subscribe()
    }

    /// Resolve once the initial list has completed.
    ///
    /// # Errors
    ///
    /// Fails if the informer is dropped before syncing.
    pub async fn wait_for_sync(&self) -> Result<()> {
        let mut ready = self.synced.subscribe();
        if until_true(&mut ready).await {
            Ok(())
        } else {
            Err(Error::cache_sync_failed("informer dropped before sync"))
        }
    }

    /// List, then follow the watch until `stop` flips.
    ///
    /// # Errors
    ///
    /// Returns `CacheSyncFailed` if the store's watch closes.
    pub async fn run(
        self: Arc<Self>,
        handler: Arc<dyn EventHandler>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut events = self.store.watch();

        loop {
            match self.relist(handler.as_ref(), false).await {
                Ok(count) => {
                    info!(objects = count, "Caches synced");
                    self.synced.send_replace(true);
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Initial list failed, retrying");
                    tokio::select! {
                        _ = until_true(&mut stop) => return Ok(()),
                        () = tokio::time::sleep(LIST_RETRY_DELAY) => {}
                    }
                }
            }
        }

        loop {
            tokio::select! {
                _ = until_true(&mut stop) => {
                    debug!("Informer stopping");
                    return Ok(());
                }
                received = events.recv() => match received {
                    Ok(event) => self.apply(event, handler.as_ref()).await,
                    Err(WatchError::Lagged { skipped }) => {
                        warn!(skipped, "Watch lagged, relisting");
                        if let Err(e) = self.relist(handler.as_ref(), false).await {
                            warn!(error = %e, "Relist after lag failed");
                        }
                    }
                    Err(WatchError::Closed) => {
                        return Err(Error::cache_sync_failed("store watch closed"));
                    }
                },
            }
        }
    }

    /// Bring the cache in line with a fresh list.
    ///
    /// New keys are reported as adds, changed versions as updates and keys
    /// missing from the list as deletes. With `resync` set, every key that
    /// was already cached is reported as a resync as well. Returns the
    /// number of listed objects.
    ///
    /// # Errors
    ///
    /// Propagates list failures; the cache is left untouched.
    pub async fn relist(&self, handler: &dyn EventHandler, resync: bool) -> Result<usize> {
        // Snapshot before listing: keys the watch adds while the list is in
        // flight are not candidates for eviction.
        let mut stale = self.cache.versions().await;
        let listed = self.store.list(&self.selector).await?;
        let count = listed.len();

        for object in listed {
            stale.remove(&object.key());
            let object = Arc::new(object);
            match self.cache.upsert(Arc::clone(&object)).await {
                Upsert::Added => handler.on_add(&object),
                Upsert::Replaced(old) if old.resource_version() != object.resource_version() => {
                    handler.on_update(&old, &object);
                    if resync {
                        handler.on_resync(&object);
                    }
                }
                Upsert::Replaced(_) | Upsert::Stale => {
                    if resync {
                        handler.on_resync(&object);
                    }
                }
            }
        }

        for (key, version) in stale {
            if let Some(gone) = self.cache.remove_if_unchanged(&key, version).await {
                debug!(key = %key, "Dropping vanished object from cache");
                handler.on_delete(&gone);
            }
        }

        Ok(count)
    }

    async fn apply(&self, event: WatchEvent, handler: &dyn EventHandler) {
        let object = Arc::clone(event.object());
        debug!(key = %object.key(), kind = event.kind(), "Watch event");

        match event {
            WatchEvent::Added(_) | WatchEvent::Updated(_) if !self.selector.matches(&object) => {
                // Relabelled out of scope.
                if self.cache.remove(&object).await {
                    handler.on_delete(&object);
                }
            }
            WatchEvent::Added(_) | WatchEvent::Updated(_) => {
                match self.cache.upsert(Arc::clone(&object)).await {
                    Upsert::Added => handler.on_add(&object),
                    Upsert::Replaced(old) => handler.on_update(&old, &object),
                    Upsert::Stale => {}
                }
            }
            WatchEvent::Deleted(_) => {
                if self.cache.remove(&object).await && self.selector.matches(&object) {
                    handler.on_delete(&object);
                }
            }
        }
    }
}
