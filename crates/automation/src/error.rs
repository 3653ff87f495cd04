//! Error types for automation server calls.

use thiserror::Error;

/// Result type alias for automation server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Automation server error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The entity does not exist.
    #[error("'{name}' not found on the automation server")]
    NotFound { name: String },

    /// An entity with this name already exists and could not be claimed.
    #[error("'{name}' already exists on the automation server")]
    AlreadyExists { name: String },

    /// Credentials were rejected or lack permission.
    #[error("automation server refused access: {reason}")]
    Unauthorized { reason: String },

    /// The server rejected the request as malformed.
    #[error("automation server rejected request ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    /// Network failure, timeout, throttling or server-side error.
    #[error("automation server unavailable: {reason}")]
    Transient { reason: String },

    /// The server answered with something we could not interpret.
    #[error("invalid response from automation server: {reason}")]
    InvalidResponse { reason: String },
}

impl Error {
    /// Create a not found error.
    pub fn not_found(name: impl ToString) -> Self {
        Self::NotFound {
            name: name.to_string(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(name: impl ToString) -> Self {
        Self::AlreadyExists {
            name: name.to_string(),
        }
    }

    /// Create an unauthorized error.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Create a rejected error.
    pub fn rejected(status: u16, reason: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            reason: reason.into(),
        }
    }

    /// Create a transient error.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    /// Create an invalid response error.
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Whether the entity was absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether retrying without operator action is unlikely to help.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists { .. } | Self::Unauthorized { .. } | Self::Rejected { .. }
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::invalid_response(err.to_string())
        } else {
            Self::transient(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::not_found("ns1/demo").is_not_found());
        assert!(!Error::not_found("ns1/demo").is_permanent());
        assert!(Error::already_exists("ns1/demo").is_permanent());
        assert!(Error::unauthorized("bad token").is_permanent());
        assert!(Error::rejected(400, "bad xml").is_permanent());
        assert!(!Error::transient("connection reset").is_permanent());
        assert!(!Error::invalid_response("truncated").is_permanent());
    }

    #[test]
    fn test_display_names_entity() {
        let err = Error::already_exists("ns1/demo");
        assert!(err.to_string().contains("ns1/demo"));
    }
}
