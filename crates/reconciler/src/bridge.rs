//! Turns cache changes into work queue keys.

use std::sync::Arc;
use std::time::Duration;

use steward_store::{ManagedResource, ObjectKey};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::informer::{EventHandler, Informer};
use crate::queue::WorkQueue;
use crate::reconciler::{
    CLEANUP_FINALIZER, SPEC_HASH_ANNOTATION, SYNC_MESSAGE_ANNOTATION, SYNC_STATUS_ANNOTATION,
    SYNC_TIME_ANNOTATION,
};
use crate::shutdown::until_true;

/// Annotations only the reconciler writes.
const OWNED_ANNOTATIONS: [&str; 4] = [
    SYNC_STATUS_ANNOTATION,
    SPEC_HASH_ANNOTATION,
    SYNC_MESSAGE_ANNOTATION,
    SYNC_TIME_ANNOTATION,
];

/// Enqueues the key of every added, deleted or meaningfully updated object.
///
/// Updates that leave the resource version unchanged (a relist echoing
/// what the cache already holds) are dropped, and so are updates that only
/// touch the reconciler's own status annotations or cleanup finalizer.
/// Those are echoes of a finished pass; a failed pass has already been
/// re-added with backoff.
#[derive(Clone)]
pub struct EventBridge {
    queue: WorkQueue<ObjectKey>,
}

impl EventBridge {
    /// Create a bridge feeding `queue`.
    #[must_use]
    pub const fn new(queue: WorkQueue<ObjectKey>) -> Self {
        Self { queue }
    }
}

impl EventHandler for EventBridge {
    fn on_add(&self, object: &ManagedResource) {
        self.queue.add(object.key());
    }

    fn on_update(&self, old: &ManagedResource, new: &ManagedResource) {
        if old.resource_version() == new.resource_version() {
            return;
        }
        if !user_visible_change(old, new) {
            debug!(key = %new.key(), "Ignoring own status write");
            return;
        }
        self.queue.add(new.key());
    }

    fn on_delete(&self, object: &ManagedResource) {
        self.queue.add(object.key());
    }

    fn on_resync(&self, object: &ManagedResource) {
        self.queue.add(object.key());
    }
}

/// Whether `old` and `new` differ in anything besides reconciler-owned
/// metadata.
fn user_visible_change(old: &ManagedResource, new: &ManagedResource) -> bool {
    let foreign_annotations = |o: &ManagedResource| {
        o.metadata()
            .annotations()
            .clone()
            .into_iter()
            .filter(|(k, _)| !OWNED_ANNOTATIONS.contains(&k.as_str()))
            .collect::<Vec<_>>()
    };
    let foreign_finalizers = |o: &ManagedResource| {
        o.metadata()
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != CLEANUP_FINALIZER)
            .cloned()
            .collect::<Vec<_>>()
    };

    old.spec() != new.spec()
        || old.is_being_deleted() != new.is_being_deleted()
        || old.metadata().labels() != new.metadata().labels()
        || foreign_annotations(old) != foreign_annotations(new)
        || foreign_finalizers(old) != foreign_finalizers(new)
}

/// Relist every `interval` and enqueue every key, until `stop` flips.
///
/// The first pass happens one full interval after start.
pub async fn run_resync(
    informer: Arc<Informer>,
    handler: Arc<dyn EventHandler>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = until_true(&mut stop) => {
                debug!("Resync stopping");
                return;
            }
            _ = ticker.tick() => {
                match informer.relist(handler.as_ref(), true).await {
                    Ok(count) => info!(objects = count, "Periodic resync"),
                    Err(e) => warn!(error = %e, "Periodic resync failed"),
                }
            }
        }
    }
}
