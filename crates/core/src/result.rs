//! Result type definition and logging combinators for best-effort operations.
//!
//! Some writes in a control loop are advisory: recording a status message or
//! emitting an event must never turn a successful pass into a failure. These
//! combinators let callers drop such errors explicitly, leaving a log line
//! instead of a silent `let _ =`.

use crate::error::Error;

/// The standard Result type for Steward core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for Results whose failure is logged and then discarded.
pub trait LogFailureExt<T> {
    /// Convert to an Option, logging the error at `warn` level with context.
    fn log_failure(self, context: &str) -> Option<T>;

    /// Get the value or a default, logging the error at `warn` level.
    fn or_default_logged(self, context: &str, default: T) -> T;
}

impl<T, E: std::fmt::Display> LogFailureExt<T> for std::result::Result<T, E> {
    fn log_failure(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{context}");
                None
            }
        }
    }

    fn or_default_logged(self, context: &str, default: T) -> T {
        self.log_failure(context).unwrap_or(default)
    }
}
