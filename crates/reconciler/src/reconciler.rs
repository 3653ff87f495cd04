//! Convergence of one managed resource with its external entity.
//!
//! State lives on the object itself, in annotations and a finalizer, so a
//! restarted controller picks up exactly where the last one stopped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use steward_automation::{ExternalName, ExternalSystemClient};
use steward_core::{ControllerSettings, LogFailureExt};
use steward_store::{ManagedResource, ObjectKey, ObjectStore};
use tracing::{debug, info, warn};

use crate::error::{Error, ErrorClass, Result};
use crate::hash::spec_hash;
use crate::informer::ResourceCache;
use crate::recorder::{EventRecorder, EventType, Reason};

/// Sync status annotation: `successful`, `failed` or `blocked`.
pub const SYNC_STATUS_ANNOTATION: &str = "steward.dev/syncstatus";
/// Hash of the last spec pushed successfully.
pub const SPEC_HASH_ANNOTATION: &str = "steward.dev/spechash";
/// Last failure, for humans.
pub const SYNC_MESSAGE_ANNOTATION: &str = "steward.dev/syncmsg";
/// RFC 3339 time of the last successful sync.
pub const SYNC_TIME_ANNOTATION: &str = "steward.dev/synctime";
/// Present (and not `"false"`) to push spec changes onto existing entities.
pub const AUTO_SYNC_ANNOTATION: &str = "steward.dev/autosync";
/// Held while the external entity may exist.
pub const CLEANUP_FINALIZER: &str = "finalizers.steward.dev/external-cleanup";

/// Values of [`SYNC_STATUS_ANNOTATION`].
pub mod status {
    pub const SUCCESSFUL: &str = "successful";
    pub const FAILED: &str = "failed";
    pub const BLOCKED: &str = "blocked";
}

/// Unit of work run by the worker pool for one key.
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Bring the object at `key` and its external counterpart in line.
    async fn reconcile(&self, key: &ObjectKey) -> Result<()>;
}

/// What a successful pass did externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Created,
    Updated,
    Adopted,
}

/// Tuning for [`Reconciler`].
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// In-process restarts after a write conflict.
    pub max_conflict_retries: u32,
    /// Query the external system again once a sync is this old.
    pub reverify_interval: Option<Duration>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::from(&ControllerSettings::default())
    }
}

impl From<&ControllerSettings> for ReconcilerConfig {
    fn from(settings: &ControllerSettings) -> Self {
        Self {
            max_conflict_retries: settings.max_conflict_retries,
            reverify_interval: settings.reverify_interval(),
        }
    }
}

/// Reconciles managed resources against the automation server.
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    client: Arc<dyn ExternalSystemClient>,
    cache: ResourceCache,
    recorder: Arc<dyn EventRecorder>,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a reconciler reading from `cache` and writing to `store`.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        client: Arc<dyn ExternalSystemClient>,
        cache: ResourceCache,
        recorder: Arc<dyn EventRecorder>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            client,
            cache,
            recorder,
            config,
        }
    }

    async fn reconcile_key(&self, key: &ObjectKey) -> Result<()> {
        let Some(cached) = self.cache.get(key).await else {
            debug!(key = %key, "Object no longer exists, nothing to do");
            return Ok(());
        };
        let mut current = (*cached).clone();
        if self.needs_work(&current) {
            // The cache can trail this controller's own writes.
            match self.store.get(key).await? {
                Some(latest) => current = latest,
                None => return Ok(()),
            }
        }
        let mut attempt = 0;

        loop {
            let outcome = if current.is_being_deleted() {
                self.finalize(current).await
            } else {
                self.sync(current).await
            };

            match outcome {
                Err(Error::Store(e)) if e.is_not_found() => {
                    debug!(key = %key, "Object removed mid-reconcile");
                    return Ok(());
                }
                Err(e) if e.class() == ErrorClass::Conflict => {
                    attempt += 1;
                    if attempt > self.config.max_conflict_retries {
                        return Err(Error::conflict(key.clone(), attempt));
                    }
                    debug!(key = %key, attempt, "Write conflict, re-reading latest");
                    match self.store.get(key).await? {
                        Some(latest) => current = latest,
                        None => return Ok(()),
                    }
                }
                other => return other,
            }
        }
    }

    async fn sync(&self, object: ManagedResource) -> Result<()> {
        let key = object.key();
        let hash = spec_hash(object.spec());

        if self.is_up_to_date(&object, &hash) {
            debug!(key = %key, "Already in sync");
            return Ok(());
        }

        let object = if object.has_finalizer(CLEANUP_FINALIZER) {
            object
        } else {
            debug!(key = %key, "Adding cleanup finalizer");
            self.store
                .update(object.with_finalizer(CLEANUP_FINALIZER))
                .await?
        };

        let name = ExternalName::for_key(&key);
        let action = match self.converge(&object, &name).await {
            Ok(action) => action,
            Err(e) => {
                self.record_sync_failure(object, &e).await;
                return Err(e);
            }
        };

        let (reason, message) = match action {
            Action::Created => (Reason::Created, format!("Created '{name}'")),
            Action::Updated => (Reason::Updated, format!("Updated '{name}' from spec")),
            Action::Adopted => (Reason::Synced, format!("'{name}' already exists")),
        };
        self.recorder
            .record(&object, EventType::Normal, reason, &message);

        let synced = object
            .with_annotation(SYNC_STATUS_ANNOTATION, status::SUCCESSFUL)
            .with_annotation(SPEC_HASH_ANNOTATION, hash)
            .with_annotation(
                SYNC_TIME_ANNOTATION,
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            )
            .without_annotation(SYNC_MESSAGE_ANNOTATION);
        self.store.update(synced).await?;

        info!(key = %key, action = ?action, "Synced");
        Ok(())
    }

    async fn converge(&self, object: &ManagedResource, name: &ExternalName) -> Result<Action> {
        let existing = self
            .client
            .get(name)
            .await
            .map_err(|e| Error::external("get", name, e))?;

        match existing {
            None => self.create(object, name).await,
            Some(_) if wants_auto_sync(object) => {
                match self.client.update(name, object.spec()).await {
                    Ok(()) => Ok(Action::Updated),
                    // Vanished between get and update.
                    Err(e) if e.is_not_found() => self.create(object, name).await,
                    Err(e) => Err(Error::external("update", name, e)),
                }
            }
            Some(_) => Ok(Action::Adopted),
        }
    }

    async fn create(&self, object: &ManagedResource, name: &ExternalName) -> Result<Action> {
        self.client
            .create(name, object.spec())
            .await
            .map(|()| Action::Created)
            .map_err(|e| Error::external("create", name, e))
    }

    async fn finalize(&self, object: ManagedResource) -> Result<()> {
        let key = object.key();
        if !object.has_finalizer(CLEANUP_FINALIZER) {
            debug!(key = %key, "No cleanup finalizer, nothing to do");
            return Ok(());
        }

        let name = ExternalName::for_key(&key);
        match self.client.delete(&name).await {
            Ok(()) => {
                self.recorder.record(
                    &object,
                    EventType::Normal,
                    Reason::Deleted,
                    &format!("Deleted '{name}'"),
                );
            }
            Err(e) if e.is_not_found() => {
                debug!(key = %key, "External entity already absent");
            }
            Err(e) => {
                let message = format!("cleanup of '{name}' failed: {e}");
                self.recorder
                    .record(&object, EventType::Warning, Reason::CleanupFailed, &message);
                self.write_status(object, status::FAILED, &message).await;
                return Err(Error::cleanup_blocked(key, e.to_string()));
            }
        }

        self.store
            .update(object.without_finalizer(CLEANUP_FINALIZER))
            .await?;
        info!(key = %key, "Finalized");
        Ok(())
    }

    fn needs_work(&self, object: &ManagedResource) -> bool {
        if object.is_being_deleted() {
            object.has_finalizer(CLEANUP_FINALIZER)
        } else {
            !self.is_up_to_date(object, &spec_hash(object.spec()))
        }
    }

    fn is_up_to_date(&self, object: &ManagedResource, hash: &str) -> bool {
        object.annotation(SYNC_STATUS_ANNOTATION) == Some(status::SUCCESSFUL)
            && object.annotation(SPEC_HASH_ANNOTATION) == Some(hash)
            && !self.reverify_due(object)
    }

    fn reverify_due(&self, object: &ManagedResource) -> bool {
        let Some(window) = self.config.reverify_interval else {
            return false;
        };
        let synced_at = object
            .annotation(SYNC_TIME_ANNOTATION)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|at| at.with_timezone(&Utc));
        synced_at.is_none_or(|at| {
            Utc::now()
                .signed_duration_since(at)
                .to_std()
                .is_ok_and(|age| age >= window)
        })
    }

    async fn record_sync_failure(&self, object: ManagedResource, error: &Error) {
        let permanent = error.class() == ErrorClass::Permanent;
        let reason = match error {
            Error::External { source, .. }
                if matches!(source, steward_automation::Error::AlreadyExists { .. }) =>
            {
                Reason::NameConflict
            }
            _ => Reason::SyncFailed,
        };
        let message = error.to_string();
        warn!(key = %object.key(), error = %message, permanent, "Sync failed");
        self.recorder
            .record(&object, EventType::Warning, reason, &message);

        let state = if permanent {
            status::BLOCKED
        } else {
            status::FAILED
        };
        self.write_status(object, state, &message).await;
    }

    /// Best-effort status write. Skipped when nothing would change, so a
    /// repeating failure does not bump the resource version every pass.
    async fn write_status(&self, object: ManagedResource, status: &str, message: &str) {
        if object.annotation(SYNC_STATUS_ANNOTATION) == Some(status)
            && object.annotation(SYNC_MESSAGE_ANNOTATION) == Some(message)
        {
            return;
        }
        let updated = object
            .with_annotation(SYNC_STATUS_ANNOTATION, status)
            .with_annotation(SYNC_MESSAGE_ANNOTATION, message);
        self.store
            .update(updated)
            .await
            .log_failure("Failed to record sync status");
    }
}

#[async_trait]
impl Reconcile for Reconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<()> {
        self.reconcile_key(key).await
    }
}

/// Whether the object opted into pushing spec changes to an existing entity.
///
/// Presence of the annotation opts in, whatever its value, except that an
/// explicit `false` (any case) opts back out.
fn wants_auto_sync(object: &ManagedResource) -> bool {
    object
        .annotation(AUTO_SYNC_ANNOTATION)
        .is_some_and(|v| !v.eq_ignore_ascii_case("false"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::informer::{EventHandler, Informer};
    use crate::recorder::InMemoryEventRecorder;
    use serde_json::json;
    use steward_automation::{InMemoryAutomationServer, Operation};
    use steward_store::{InMemoryObjectStore, Selector};

    struct Ignore;

    impl EventHandler for Ignore {
        fn on_add(&self, _: &ManagedResource) {}
        fn on_update(&self, _: &ManagedResource, _: &ManagedResource) {}
        fn on_delete(&self, _: &ManagedResource) {}
        fn on_resync(&self, _: &ManagedResource) {}
    }

    struct Fixture {
        store: Arc<InMemoryObjectStore>,
        server: Arc<InMemoryAutomationServer>,
        recorder: Arc<InMemoryEventRecorder>,
        informer: Informer,
        reconciler: Reconciler,
    }

    fn fixture(config: ReconcilerConfig) -> Fixture {
        let store = InMemoryObjectStore::new_arc();
        let server = Arc::new(InMemoryAutomationServer::new());
        let recorder = Arc::new(InMemoryEventRecorder::new());
        let informer = Informer::new(store.clone(), Selector::everything());
        let reconciler = Reconciler::new(
            store.clone(),
            server.clone(),
            informer.cache().clone(),
            recorder.clone(),
            config,
        );
        Fixture {
            store,
            server,
            recorder,
            informer,
            reconciler,
        }
    }

    impl Fixture {
        /// Reconcile against a freshly listed cache.
        async fn reconcile(&self, key: &ObjectKey) -> Result<()> {
            self.informer.relist(&Ignore, false).await?;
            self.reconciler.reconcile(key).await
        }

        async fn object(&self, key: &ObjectKey) -> ManagedResource {
            self.store.get(key).await.unwrap().unwrap()
        }
    }

    fn demo_key() -> ObjectKey {
        ObjectKey::new("ns1", "demo")
    }

    #[tokio::test]
    async fn test_missing_object_is_success() {
        let f = fixture(ReconcilerConfig::default());
        assert!(f.reconcile(&demo_key()).await.is_ok());
        assert_eq!(f.server.calls(Operation::Get), 0);
    }

    #[tokio::test]
    async fn test_first_pass_adds_finalizer_creates_and_records_status() {
        let f = fixture(ReconcilerConfig::default());
        f.store
            .create(ManagedResource::new("ns1", "demo", json!({"jenkinsfile": "echo hi"})))
            .await
            .unwrap();

        f.reconcile(&demo_key()).await.unwrap();

        let obj = f.object(&demo_key()).await;
        assert!(obj.has_finalizer(CLEANUP_FINALIZER));
        assert_eq!(obj.annotation(SYNC_STATUS_ANNOTATION), Some(status::SUCCESSFUL));
        assert_eq!(
            obj.annotation(SPEC_HASH_ANNOTATION),
            Some(spec_hash(obj.spec()).as_str())
        );
        assert!(obj.annotation(SYNC_TIME_ANNOTATION).is_some());
        assert_eq!(f.server.calls(Operation::Create), 1);
        assert_eq!(f.recorder.reasons_for(&demo_key()), vec![Reason::Created]);
    }

    #[tokio::test]
    async fn test_existing_entity_is_adopted_without_auto_sync() {
        let f = fixture(ReconcilerConfig::default());
        f.server.insert(ExternalName::for_key(&demo_key()), json!({"old": true})).await;
        f.store
            .create(ManagedResource::new("ns1", "demo", json!({"new": true})))
            .await
            .unwrap();

        f.reconcile(&demo_key()).await.unwrap();

        assert_eq!(f.server.calls(Operation::Create), 0);
        assert_eq!(f.server.calls(Operation::Update), 0);
        assert_eq!(f.recorder.reasons_for(&demo_key()), vec![Reason::Synced]);
        let entity = f.server.entity(&ExternalName::for_key(&demo_key())).await.unwrap();
        assert_eq!(entity.spec, Some(json!({"old": true})));
    }

    #[tokio::test]
    async fn test_name_collision_is_blocked() {
        let f = fixture(ReconcilerConfig::default());
        f.server
            .fail_next(
                Operation::Create,
                steward_automation::Error::already_exists("ns1/demo"),
            )
            .await;
        f.store
            .create(ManagedResource::new("ns1", "demo", json!({})))
            .await
            .unwrap();

        let err = f.reconcile(&demo_key()).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Permanent);

        let obj = f.object(&demo_key()).await;
        assert_eq!(obj.annotation(SYNC_STATUS_ANNOTATION), Some(status::BLOCKED));
        assert!(
            obj.annotation(SYNC_MESSAGE_ANNOTATION)
                .is_some_and(|m| m.contains("already exists"))
        );
        assert!(obj.has_finalizer(CLEANUP_FINALIZER));
        assert_eq!(f.recorder.count(Reason::NameConflict), 1);
    }

    #[tokio::test]
    async fn test_success_clears_previous_failure_message() {
        let f = fixture(ReconcilerConfig::default());
        f.server
            .fail_next(Operation::Create, steward_automation::Error::transient("503"))
            .await;
        f.store
            .create(ManagedResource::new("ns1", "demo", json!({})))
            .await
            .unwrap();

        assert!(f.reconcile(&demo_key()).await.is_err());
        let failed = f.object(&demo_key()).await;
        assert_eq!(failed.annotation(SYNC_STATUS_ANNOTATION), Some(status::FAILED));

        f.reconcile(&demo_key()).await.unwrap();
        let synced = f.object(&demo_key()).await;
        assert_eq!(synced.annotation(SYNC_STATUS_ANNOTATION), Some(status::SUCCESSFUL));
        assert_eq!(synced.annotation(SYNC_MESSAGE_ANNOTATION), None);
    }

    #[tokio::test]
    async fn test_reverify_window_queries_again() {
        let f = fixture(ReconcilerConfig {
            max_conflict_retries: 5,
            reverify_interval: Some(Duration::from_secs(60)),
        });
        let stale_time = (Utc::now() - chrono::Duration::minutes(5))
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let spec = json!({"v": 1});
        f.store
            .create(
                ManagedResource::new("ns1", "demo", spec.clone())
                    .with_finalizer(CLEANUP_FINALIZER)
                    .with_annotation(SYNC_STATUS_ANNOTATION, status::SUCCESSFUL)
                    .with_annotation(SPEC_HASH_ANNOTATION, spec_hash(&spec))
                    .with_annotation(SYNC_TIME_ANNOTATION, stale_time),
            )
            .await
            .unwrap();

        f.reconcile(&demo_key()).await.unwrap();
        assert_eq!(f.server.calls(Operation::Get), 1);
        // Entity was missing; re-verification recreated it.
        assert_eq!(f.server.calls(Operation::Create), 1);

        // Fresh sync time: short-circuits again.
        f.reconcile(&demo_key()).await.unwrap();
        assert_eq!(f.server.calls(Operation::Get), 1);
    }

    #[tokio::test]
    async fn test_cache_behind_own_writes_does_not_repeat_calls() {
        let f = fixture(ReconcilerConfig::default());
        f.store
            .create(ManagedResource::new("ns1", "demo", json!({})))
            .await
            .unwrap();
        f.reconcile(&demo_key()).await.unwrap();

        // Cache still holds the pre-sync copy.
        f.reconciler.reconcile(&demo_key()).await.unwrap();
        assert_eq!(f.server.calls(Operation::Get), 1);
        assert_eq!(f.server.calls(Operation::Create), 1);
    }

    #[tokio::test]
    async fn test_finalize_without_finalizer_is_noop() {
        let f = fixture(ReconcilerConfig::default());
        let obj = ManagedResource::new("ns1", "demo", json!({}));
        assert!(f.reconciler.finalize(obj).await.is_ok());
        assert_eq!(f.server.calls(Operation::Delete), 0);
    }

    #[test]
    fn test_auto_sync_opt_in() {
        let base = ManagedResource::new("ns1", "demo", json!({}));
        assert!(!wants_auto_sync(&base));
        assert!(wants_auto_sync(&base.clone().with_annotation(AUTO_SYNC_ANNOTATION, "true")));
        assert!(wants_auto_sync(&base.clone().with_annotation(AUTO_SYNC_ANNOTATION, "")));
        assert!(wants_auto_sync(&base.clone().with_annotation(AUTO_SYNC_ANNOTATION, "no")));
        assert!(!wants_auto_sync(&base.clone().with_annotation(AUTO_SYNC_ANNOTATION, "False")));
        assert!(!wants_auto_sync(&base.with_annotation(AUTO_SYNC_ANNOTATION, "FALSE")));
    }
}
