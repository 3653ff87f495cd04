//! Worker pool draining the work queue.
//!
//! Each worker loops `get -> reconcile -> done`. Whatever a reconcile does,
//! including panicking or hanging, stays inside that worker's iteration.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use steward_store::ObjectKey;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{Error, ErrorClass, Result};
use crate::queue::WorkQueue;
use crate::reconciler::Reconcile;

/// Spawns and drains reconcile workers.
pub struct WorkerPool {
    queue: WorkQueue<ObjectKey>,
    reconciler: Arc<dyn Reconcile>,
    reconcile_timeout: Duration,
    workers: JoinSet<()>,
}

impl WorkerPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new(
        queue: WorkQueue<ObjectKey>,
        reconciler: Arc<dyn Reconcile>,
        reconcile_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            reconciler,
            reconcile_timeout,
            workers: JoinSet::new(),
        }
    }

    /// Start `count` workers.
    pub fn spawn(&mut self, count: usize) {
        for id in 0..count {
            let queue = self.queue.clone();
            let reconciler = Arc::clone(&self.reconciler);
            let timeout = self.reconcile_timeout;
            self.workers
                .spawn(async move { run_worker(id, queue, reconciler, timeout).await });
        }
        info!(workers = count, "Started workers");
    }

    /// Number of workers still running.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether no workers are running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Shut the queue down and wait up to `grace` for workers to finish
    /// their current item. Stragglers are aborted.
    pub async fn shutdown(mut self, grace: Duration) {
        self.queue.shut_down();
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = self.workers.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Worker task failed");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = self.workers.len(),
                grace_secs = grace.as_secs(),
                "Workers did not drain in time, aborting"
            );
            self.workers.abort_all();
            while self.workers.join_next().await.is_some() {}
        }
        info!("Workers stopped");
    }
}

async fn run_worker(
    id: usize,
    queue: WorkQueue<ObjectKey>,
    reconciler: Arc<dyn Reconcile>,
    timeout: Duration,
) {
    debug!(worker = id, "Worker started");
    while let Some(key) = queue.get().await {
        let result = guarded(reconciler.as_ref(), &key, timeout).await;
        settle(&queue, &key, result);
        queue.done(&key);
    }
    debug!(worker = id, "Worker stopped");
}

/// Run one reconcile under a deadline, turning a panic into an error.
async fn guarded(reconciler: &dyn Reconcile, key: &ObjectKey, timeout: Duration) -> Result<()> {
    let attempt = AssertUnwindSafe(reconciler.reconcile(key)).catch_unwind();
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => Err(Error::panicked(key.clone(), panic_message(panic.as_ref()))),
        Err(_) => Err(Error::timed_out(key.clone(), timeout)),
    }
}

/// Requeue policy for one finished reconcile.
fn settle(queue: &WorkQueue<ObjectKey>, key: &ObjectKey, result: Result<()>) {
    let Err(e) = result else {
        queue.forget(key);
        return;
    };

    match e.class() {
        ErrorClass::NotFound => {
            debug!(key = %key, error = %e, "Treating missing object as done");
            queue.forget(key);
        }
        ErrorClass::Conflict => {
            debug!(key = %key, error = %e, "Conflict, requeueing immediately");
            queue.forget(key);
            queue.add(key.clone());
        }
        class => {
            warn!(
                key = %key,
                error = %e,
                class = ?class,
                requeues = queue.num_requeues(key),
                "Reconcile failed, backing off"
            );
            queue.add_rate_limited(key.clone());
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::rate_limiter::BackoffLimiter;

    fn queue() -> WorkQueue<ObjectKey> {
        WorkQueue::new(BackoffLimiter::new(
            Duration::from_millis(1),
            Duration::from_millis(10),
            false,
        ))
    }

    /// Fails the first `failures` calls in the given way, then succeeds.
    struct Scripted {
        calls: AtomicUsize,
        failures: usize,
        mode: Mode,
    }

    #[derive(Clone, Copy)]
    enum Mode {
        Panic,
        Hang,
        Transient,
    }

    #[async_trait]
    impl Reconcile for Scripted {
        async fn reconcile(&self, key: &ObjectKey) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n >= self.failures {
                return Ok(());
            }
            match self.mode {
                Mode::Panic => panic!("reconcile of {key} exploded"),
                Mode::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
                Mode::Transient => Err(Error::external(
                    "create",
                    key,
                    steward_automation::Error::transient("503"),
                )),
            }
        }
    }

    async fn run_until_calls(mode: Mode, failures: usize, expect: usize) -> Arc<Scripted> {
        let q = queue();
        let scripted = Arc::new(Scripted {
            calls: AtomicUsize::new(0),
            failures,
            mode,
        });
        let mut pool = WorkerPool::new(q.clone(), scripted.clone(), Duration::from_millis(50));
        pool.spawn(2);
        q.add(ObjectKey::new("ns1", "demo"));

        tokio::time::timeout(Duration::from_secs(2), async {
            while scripted.calls.load(Ordering::SeqCst) < expect {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        pool.shutdown(Duration::from_secs(1)).await;
        scripted
    }

    #[tokio::test]
    async fn test_panic_is_contained_and_retried() {
        let scripted = run_until_calls(Mode::Panic, 1, 2).await;
        assert!(scripted.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_hung_reconcile_times_out_and_retries() {
        let scripted = run_until_calls(Mode::Hang, 1, 2).await;
        assert!(scripted.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_transient_failures_back_off_then_succeed() {
        let scripted = run_until_calls(Mode::Transient, 3, 4).await;
        assert_eq!(scripted.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_guarded_reports_panic_message() {
        let scripted = Scripted {
            calls: AtomicUsize::new(0),
            failures: 1,
            mode: Mode::Panic,
        };
        let key = ObjectKey::new("ns1", "demo");
        let err = guarded(&scripted, &key, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::Panicked { .. }));
        assert!(err.to_string().contains("exploded"));
    }

    #[test]
    fn test_settle_policies() {
        let q = queue();
        let key = ObjectKey::new("ns1", "demo");

        settle(&q, &key, Err(Error::conflict(key.clone(), 1)));
        assert_eq!(q.len(), 1);
        assert_eq!(q.num_requeues(&key), 0);

        settle(&q, &key, Ok(()));
        assert_eq!(q.num_requeues(&key), 0);
    }
}
