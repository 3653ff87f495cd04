//! Shared fixtures for controller integration tests.

#![allow(dead_code, clippy::panic)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use steward_automation::InMemoryAutomationServer;
use steward_core::StewardConfig;
use steward_reconciler::{
    Controller, EventHandler, InMemoryEventRecorder, Informer, Reconcile, Reconciler,
    ReconcilerConfig,
};
use steward_store::{InMemoryObjectStore, ManagedResource, ObjectKey, ObjectStore, Selector};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Test helper: Unwrap a Result or panic with context
pub fn unwrap_result<T, E: std::fmt::Display>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{context}: {e}"),
    }
}

/// Configuration with fast retries for tests.
pub fn test_config() -> StewardConfig {
    let mut config = StewardConfig::default();
    config.controller.workers = 2;
    config.controller.reconcile_timeout_secs = 5;
    config.controller.shutdown_timeout_secs = 2;
    config.backoff.base_delay_ms = 5;
    config.backoff.max_delay_ms = 200;
    config
}

/// Poll `check` until it returns true or five seconds pass.
pub async fn eventually<F, Fut>(what: &str, mut check: F) -> Result<(), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(format!("timed out waiting for {what}"))
}

/// Poll the store until `key` satisfies `check`.
pub async fn wait_for_object<F>(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    what: &str,
    check: F,
) -> Result<ManagedResource, String>
where
    F: Fn(&ManagedResource) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if let Ok(Some(object)) = store.get(key).await {
            if check(&object) {
                return Ok(object);
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(format!("timed out waiting for {key} to be {what}"))
}

/// Poll the store until `key` is physically gone.
pub async fn wait_for_removal(store: &dyn ObjectStore, key: &ObjectKey) -> Result<(), String> {
    eventually("removal", || async move {
        matches!(store.get(key).await, Ok(None))
    })
    .await
}

/// Read-modify-write against the store, retrying on conflict.
pub async fn edit<F>(store: &dyn ObjectStore, key: &ObjectKey, mut change: F) -> TestResult
where
    F: FnMut(ManagedResource) -> ManagedResource,
{
    for _ in 0..20 {
        let current = store.get(key).await?.ok_or("object missing")?;
        match store.update(change(current)).await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_conflict() => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err("edit kept conflicting".into())
}

/// A controller running in the background over in-memory backends.
pub struct Running {
    pub store: Arc<InMemoryObjectStore>,
    pub server: Arc<InMemoryAutomationServer>,
    pub recorder: Arc<InMemoryEventRecorder>,
    pub controller: Arc<Controller>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<steward_reconciler::Result<()>>,
}

impl Running {
    /// Start a controller and wait for its caches to sync.
    pub async fn start(
        store: Arc<InMemoryObjectStore>,
        server: Arc<InMemoryAutomationServer>,
        config: StewardConfig,
    ) -> Result<Self, String> {
        let recorder = Arc::new(InMemoryEventRecorder::new());
        let workers = config.controller.workers;
        let controller = Arc::new(
            Controller::new(store.clone(), server.clone(), recorder.clone(), config)
                .map_err(|e| e.to_string())?,
        );
        let (stop, stop_rx) = oneshot::channel::<()>();
        let task = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                controller
                    .run(workers, async move {
                        let _ = stop_rx.await;
                    })
                    .await
            })
        };

        let mut ready = controller.readiness();
        tokio::time::timeout(Duration::from_secs(5), ready.wait_for(|r| *r))
            .await
            .map_err(|_| "caches never synced".to_string())?
            .map_err(|e| e.to_string())?;

        Ok(Self {
            store,
            server,
            recorder,
            controller,
            stop,
            task,
        })
    }

    /// Stop the controller and wait for it to drain.
    pub async fn stop(self) -> Result<(), String> {
        let _ = self.stop.send(());
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .map_err(|_| "controller did not stop".to_string())?
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())
    }
}

/// Ignores informer callbacks.
pub struct Ignore;

impl EventHandler for Ignore {
    fn on_add(&self, _: &ManagedResource) {}
    fn on_update(&self, _: &ManagedResource, _: &ManagedResource) {}
    fn on_delete(&self, _: &ManagedResource) {}
    fn on_resync(&self, _: &ManagedResource) {}
}

/// A reconciler driven by hand, for step-by-step assertions.
pub struct Direct {
    pub store: Arc<dyn ObjectStore>,
    pub server: Arc<InMemoryAutomationServer>,
    pub recorder: Arc<InMemoryEventRecorder>,
    informer: Informer,
    reconciler: Reconciler,
}

impl Direct {
    pub fn new(store: Arc<dyn ObjectStore>, server: Arc<InMemoryAutomationServer>) -> Self {
        let recorder = Arc::new(InMemoryEventRecorder::new());
        let informer = Informer::new(Arc::clone(&store), Selector::everything());
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            server.clone(),
            informer.cache().clone(),
            recorder.clone(),
            ReconcilerConfig::default(),
        );
        Self {
            store,
            server,
            recorder,
            informer,
            reconciler,
        }
    }

    /// Refresh the cache from the store, then reconcile `key` once.
    pub async fn reconcile(&self, key: &ObjectKey) -> steward_reconciler::Result<()> {
        self.informer.relist(&Ignore, false).await?;
        self.reconciler.reconcile(key).await
    }

    /// Latest stored state of `key`.
    pub async fn object(&self, key: &ObjectKey) -> Option<ManagedResource> {
        unwrap_result(self.store.get(key).await, "store get")
    }
}
