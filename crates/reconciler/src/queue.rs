//! Deduplicating, rate-limited work queue.
//!
//! A key is in at most one of three places: waiting in the queue, being
//! processed by a worker, or nowhere. Adding a key that is waiting does
//! nothing. Adding a key that is being processed marks it dirty, and
//! [`WorkQueue::done`] puts it back exactly once. Together these give
//! single-flight processing per key.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use steward_core::BackoffSettings;
use tokio::sync::Notify;
use tracing::trace;

use crate::rate_limiter::BackoffLimiter;

struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
}

struct Shared<K> {
    state: Mutex<State<K>>,
    notify: Notify,
    limiter: BackoffLimiter<K>,
}

/// Work queue shared by the event bridge and the worker pool. Cloning is
/// cheap; all clones share one queue.
pub struct WorkQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Create a queue whose failures back off per `limiter`.
    #[must_use]
    pub fn new(limiter: BackoffLimiter<K>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                limiter,
            }),
        }
    }

    /// Create a queue from backoff configuration.
    #[must_use]
    pub fn from_settings(settings: &BackoffSettings) -> Self {
        Self::new(BackoffLimiter::from_settings(settings))
    }

    fn state(&self) -> MutexGuard<'_, State<K>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `key`, coalescing with any pending or in-flight entry.
    pub fn add(&self, key: K) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.shared.notify.notify_one();
    }

    /// Enqueue `key` once `delay` has elapsed.
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Enqueue `key` after its current backoff delay, and bump the delay.
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.shared.limiter.when(&key);
        trace!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "Rate limited requeue");
        self.add_after(key, delay);
    }

    /// Reset the backoff of `key`.
    pub fn forget(&self, key: &K) {
        self.shared.limiter.forget(key);
    }

    /// Consecutive rate-limited requeues of `key` since it was last forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.shared.limiter.num_requeues(key)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    ///
    /// The key counts as in flight until [`WorkQueue::done`] is called.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Mark `key` as finished, requeueing it if it was added meanwhile.
    pub fn done(&self, key: &K) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.shared.notify.notify_one();
        }
    }

    /// Stop handing out keys and ignore further adds. Blocked
    /// [`WorkQueue::get`] calls return `None`.
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.shared.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shut_down`] was called.
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    /// Whether no keys are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently handed out and not yet done.
    pub fn in_flight(&self) -> usize {
        self.state().processing.len()
    }
}
