//! Error types for the store crate.

use thiserror::Error;

use crate::types::ObjectKey;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Store error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// No object with this key.
    #[error("object '{key}' not found")]
    NotFound { key: ObjectKey },

    /// Create collided with an existing object.
    #[error("object '{key}' already exists")]
    AlreadyExists { key: ObjectKey },

    /// Optimistic-concurrency check failed.
    #[error(
        "conflict updating '{key}': the object has been modified (current version {current}, update based on {provided})"
    )]
    Conflict {
        key: ObjectKey,
        current: String,
        provided: String,
    },

    /// Malformed object or key.
    #[error("invalid object: {reason}")]
    Invalid { reason: String },

    /// Backend could not serve the request.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
}

impl Error {
    /// Create a not found error.
    #[must_use]
    pub const fn not_found(key: ObjectKey) -> Self {
        Self::NotFound { key }
    }

    /// Create an already exists error.
    #[must_use]
    pub const fn already_exists(key: ObjectKey) -> Self {
        Self::AlreadyExists { key }
    }

    /// Create a conflict error.
    pub fn conflict(key: ObjectKey, current: impl ToString, provided: impl ToString) -> Self {
        Self::Conflict {
            key,
            current: current.to_string(),
            provided: provided.to_string(),
        }
    }

    /// Create an invalid object error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    /// Create an unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Whether the object was missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this is an optimistic-concurrency conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_display() {
        let err = Error::conflict(ObjectKey::new("ns1", "demo"), 7, 5);
        let msg = err.to_string();
        assert!(msg.contains("ns1/demo"));
        assert!(msg.contains("current version 7"));
        assert!(err.is_conflict());
        assert!(!err.is_not_found());
    }
}
