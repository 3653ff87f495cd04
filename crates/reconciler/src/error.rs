//! Error types for the reconciler crate.

use std::time::Duration;

use steward_store::ObjectKey;
use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Object store call failed.
    #[error("store error: {0}")]
    Store(#[from] steward_store::Error),

    /// Automation server call failed.
    #[error("{operation} of '{name}' on the automation server failed: {source}")]
    External {
        operation: &'static str,
        name: String,
        #[source]
        source: steward_automation::Error,
    },

    /// Status could not be persisted without losing a concurrent write.
    #[error("'{key}' kept changing underneath the reconciler ({attempts} attempts)")]
    Conflict { key: ObjectKey, attempts: u32 },

    /// External cleanup failed; the finalizer stays in place.
    #[error("cleanup of '{key}' blocked: {reason}")]
    CleanupBlocked { key: ObjectKey, reason: String },

    /// The reconcile future panicked.
    #[error("reconcile of '{key}' panicked: {message}")]
    Panicked { key: ObjectKey, message: String },

    /// The reconcile future exceeded its deadline.
    #[error("reconcile of '{key}' timed out after {timeout:?}")]
    TimedOut { key: ObjectKey, timeout: Duration },

    /// The informer never reached a synced state.
    #[error("caches failed to sync: {reason}")]
    CacheSyncFailed { reason: String },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// How the worker pool should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The thing is already gone. Counts as success.
    NotFound,
    /// Lost an optimistic-concurrency race. Retry at once.
    Conflict,
    /// Network, timeout or server-side failure. Retry with backoff.
    Transient,
    /// Needs operator action, but is still retried with backoff.
    Permanent,
    /// Deletion is held by the finalizer until cleanup succeeds.
    CleanupBlocked,
}

impl Error {
    /// Create an external call error.
    pub fn external(
        operation: &'static str,
        name: impl ToString,
        source: steward_automation::Error,
    ) -> Self {
        Self::External {
            operation,
            name: name.to_string(),
            source,
        }
    }

    /// Create a conflict error.
    #[must_use]
    pub const fn conflict(key: ObjectKey, attempts: u32) -> Self {
        Self::Conflict { key, attempts }
    }

    /// Create a cleanup blocked error.
    pub fn cleanup_blocked(key: ObjectKey, reason: impl Into<String>) -> Self {
        Self::CleanupBlocked {
            key,
            reason: reason.into(),
        }
    }

    /// Create a panicked error.
    pub fn panicked(key: ObjectKey, message: impl Into<String>) -> Self {
        Self::Panicked {
            key,
            message: message.into(),
        }
    }

    /// Create a timed out error.
    #[must_use]
    pub const fn timed_out(key: ObjectKey, timeout: Duration) -> Self {
        Self::TimedOut { key, timeout }
    }

    /// Create a cache sync failed error.
    pub fn cache_sync_failed(reason: impl Into<String>) -> Self {
        Self::CacheSyncFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Classify for retry handling.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Store(steward_store::Error::NotFound { .. }) => ErrorClass::NotFound,
            Self::Store(steward_store::Error::Conflict { .. }) | Self::Conflict { .. } => {
                ErrorClass::Conflict
            }
            Self::Store(_) | Self::Panicked { .. } | Self::TimedOut { .. } => {
                ErrorClass::Transient
            }
            Self::External { source, .. } => {
                if source.is_not_found() {
                    ErrorClass::NotFound
                } else if source.is_permanent() {
                    ErrorClass::Permanent
                } else {
                    ErrorClass::Transient
                }
            }
            Self::CleanupBlocked { .. } => ErrorClass::CleanupBlocked,
            Self::CacheSyncFailed { .. } | Self::InvalidConfig { .. } => ErrorClass::Permanent,
        }
    }
}
