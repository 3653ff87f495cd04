//! Per-key exponential backoff.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use steward_core::BackoffSettings;

/// Calculate exponential backoff duration: `base * 2^attempt`, capped at
/// `max_ms`.
#[must_use]
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let backoff = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(backoff.min(max_ms))
}

/// Tracks consecutive failures per key and hands out retry delays.
///
/// Retries are unbounded; only the delay is capped.
#[derive(Debug)]
pub struct BackoffLimiter<K> {
    base_ms: u64,
    max_ms: u64,
    jitter: bool,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K: Eq + Hash + Clone> BackoffLimiter<K> {
    /// Create a limiter.
    #[must_use]
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX).max(1);
        let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX).max(base_ms);
        Self {
            base_ms,
            max_ms,
            jitter,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Create a limiter from configuration.
    #[must_use]
    pub fn from_settings(settings: &BackoffSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
            settings.jitter,
        )
    }

    /// Record a failure of `key` and return how long to wait before retrying.
    pub fn when(&self, key: &K) -> Duration {
        let attempt = {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            let count = failures.entry(key.clone()).or_insert(0);
            let attempt = *count;
            *count = count.saturating_add(1);
            attempt
        };
        let delay = calculate_backoff(attempt, self.base_ms, self.max_ms);
        if self.jitter {
            spread(delay)
        } else {
            delay
        }
    }

    /// Reset the failure count of `key`.
    pub fn forget(&self, key: &K) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Consecutive failures recorded for `key`.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

/// Uniform over `[delay/2, delay]`.
fn spread(delay: Duration) -> Duration {
    let max = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if max < 2 {
        return delay;
    }
    Duration::from_millis(rand::thread_rng().gen_range(max / 2..=max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_backoff() {
        assert_eq!(calculate_backoff(0, 5, 1000), Duration::from_millis(5));
        assert_eq!(calculate_backoff(3, 5, 1000), Duration::from_millis(40));
        assert_eq!(calculate_backoff(10, 5, 1000), Duration::from_millis(1000));
        assert_eq!(calculate_backoff(200, 5, 1000), Duration::from_millis(1000));
    }

    #[test]
    fn test_delays_double_per_key() {
        let limiter = BackoffLimiter::new(Duration::from_millis(10), Duration::from_secs(1), false);
        assert_eq!(limiter.when(&"a"), Duration::from_millis(10));
        assert_eq!(limiter.when(&"a"), Duration::from_millis(20));
        assert_eq!(limiter.when(&"b"), Duration::from_millis(10));
        assert_eq!(limiter.when(&"a"), Duration::from_millis(40));
        assert_eq!(limiter.num_requeues(&"a"), 3);
    }

    #[test]
    fn test_forget_resets() {
        let limiter = BackoffLimiter::new(Duration::from_millis(10), Duration::from_secs(1), false);
        limiter.when(&"a");
        limiter.when(&"a");
        limiter.forget(&"a");
        assert_eq!(limiter.num_requeues(&"a"), 0);
        assert_eq!(limiter.when(&"a"), Duration::from_millis(10));
    }

    #[test]
    fn test_jitter_stays_in_window() {
        let limiter = BackoffLimiter::new(Duration::from_millis(100), Duration::from_secs(10), true);
        for attempt in 0..6u32 {
            let ceiling = calculate_backoff(attempt, 100, 10_000);
            let delay = limiter.when(&"k");
            assert!(delay <= ceiling);
            assert!(delay >= ceiling / 2);
        }
    }
}
