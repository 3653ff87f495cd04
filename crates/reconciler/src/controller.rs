//! Wiring of informer, bridge, queue, reconciler and workers.

use std::future::Future;
use std::sync::Arc;

use steward_automation::ExternalSystemClient;
use steward_core::StewardConfig;
use steward_store::{ObjectKey, ObjectStore, Selector};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::bridge::{self, EventBridge};
use crate::error::{Error, Result};
use crate::informer::{EventHandler, Informer, ResourceCache};
use crate::queue::WorkQueue;
use crate::reconciler::{Reconcile, Reconciler, ReconcilerConfig};
use crate::recorder::EventRecorder;
use crate::worker::WorkerPool;

/// The control loop for managed resources.
///
/// A controller runs once: [`Controller::run`] consumes the queue, which
/// cannot be restarted after shutdown.
pub struct Controller {
    config: StewardConfig,
    informer: Arc<Informer>,
    queue: WorkQueue<ObjectKey>,
    reconciler: Arc<dyn Reconcile>,
}

impl Controller {
    /// Build a controller from its collaborators.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` does not validate.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        client: Arc<dyn ExternalSystemClient>,
        recorder: Arc<dyn EventRecorder>,
        config: StewardConfig,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::invalid_config(e.to_string()))?;

        let selector = config
            .controller
            .namespace
            .as_deref()
            .map_or_else(Selector::everything, Selector::in_namespace);
        let informer = Arc::new(Informer::new(Arc::clone(&store), selector));
        let queue = WorkQueue::from_settings(&config.backoff);
        let reconciler = Arc::new(Reconciler::new(
            store,
            client,
            informer.cache().clone(),
            recorder,
            ReconcilerConfig::from(&config.controller),
        ));

        Ok(Self {
            config,
            informer,
            queue,
            reconciler,
        })
    }

    /// The read model the reconciler works from.
    #[must_use]
    pub fn cache(&self) -> &ResourceCache {
        self.informer.cache()
    }

    /// The work queue, for inspection.
    #[must_use]
    pub const fn queue(&self) -> &WorkQueue<ObjectKey> {
        &self.queue
    }

    /// Flips to `true` once caches are synced, before workers start.
    #[must_use]
    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.informer.readiness()
    }

    /// Run until `stop` resolves.
    ///
    /// Starts the informer, waits for caches to sync, then starts the
    /// periodic resync and `workers` workers. On stop the queue stops
    /// handing out keys and in-flight reconciles get up to the configured
    /// shutdown timeout to finish.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for zero workers and `CacheSyncFailed` if the
    /// informer dies before syncing.
    pub async fn run<F>(&self, workers: usize, stop: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        if workers == 0 {
            return Err(Error::invalid_config("at least one worker is required"));
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handler: Arc<dyn EventHandler> = Arc::new(EventBridge::new(self.queue.clone()));
        let mut informer_task = tokio::spawn(
            Arc::clone(&self.informer).run(Arc::clone(&handler), stop_rx.clone()),
        );
        tokio::pin!(stop);

        info!("Waiting for caches to sync");
        let startup = tokio::select! {
            () = &mut stop => Startup::Stopped,
            joined = &mut informer_task => Startup::InformerExited(joined),
            synced = self.informer.wait_for_sync() => Startup::Synced(synced),
        };
        match startup {
            Startup::Synced(synced) => synced?,
            Startup::Stopped => {
                info!("Stopped before caches synced");
                stop_tx.send_replace(true);
                self.queue.shut_down();
                join_informer(informer_task).await;
                return Ok(());
            }
            Startup::InformerExited(joined) => {
                self.queue.shut_down();
                return Err(match joined {
                    Ok(Err(e)) => e,
                    Ok(Ok(())) => Error::cache_sync_failed("informer exited before sync"),
                    Err(e) => Error::cache_sync_failed(format!("informer task failed: {e}")),
                });
            }
        }

        let resync_task = tokio::spawn(bridge::run_resync(
            Arc::clone(&self.informer),
            handler,
            self.config.controller.resync_interval(),
            stop_rx,
        ));

        let mut pool = WorkerPool::new(
            self.queue.clone(),
            Arc::clone(&self.reconciler),
            self.config.controller.reconcile_timeout(),
        );
        pool.spawn(workers);
        info!(workers, "Controller running");

        let informer_joined = tokio::select! {
            () = &mut stop => {
                info!("Stop requested, draining workers");
                false
            }
            joined = &mut informer_task => {
                match joined {
                    Ok(Err(e)) => error!(error = %e, "Informer failed, stopping controller"),
                    Ok(Ok(())) => warn!("Informer exited, stopping controller"),
                    Err(e) => error!(error = %e, "Informer task failed, stopping controller"),
                }
                true
            }
        };

        stop_tx.send_replace(true);
        pool.shutdown(self.config.controller.shutdown_timeout()).await;
        if let Err(e) = resync_task.await {
            warn!(error = %e, "Resync task failed");
        }
        if !informer_joined {
            join_informer(informer_task).await;
        }
        info!("Controller stopped");
        Ok(())
    }
}

enum Startup {
    Synced(Result<()>),
    Stopped,
    InformerExited(std::result::Result<Result<()>, tokio::task::JoinError>),
}

async fn join_informer(task: tokio::task::JoinHandle<Result<()>>) {
    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Informer stopped with error"),
        Err(e) => warn!(error = %e, "Informer task failed"),
    }
}
