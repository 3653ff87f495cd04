//! Events attached to managed resources.
//!
//! The reconciler reports what it did to each object through an
//! [`EventRecorder`] handed to it at construction.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use steward_store::{ManagedResource, ObjectKey};
use tracing::{info, warn};

/// Severity of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

/// Why an event was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    /// External entity was created.
    Created,
    /// External entity was updated from the spec.
    Updated,
    /// External entity already existed and was adopted as is.
    Synced,
    /// External entity was removed during finalization.
    Deleted,
    /// Create or update failed.
    SyncFailed,
    /// The external name is taken by something else.
    NameConflict,
    /// External cleanup failed; deletion is held.
    CleanupFailed,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "Created",
            Self::Updated => "Updated",
            Self::Synced => "Synced",
            Self::Deleted => "Deleted",
            Self::SyncFailed => "SyncFailed",
            Self::NameConflict => "NameConflict",
            Self::CleanupFailed => "CleanupFailed",
        };
        f.write_str(s)
    }
}

/// Sink for object events.
pub trait EventRecorder: Send + Sync {
    /// Record an event against `object`.
    fn record(&self, object: &ManagedResource, event_type: EventType, reason: Reason, message: &str);
}

/// Writes events to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventRecorder;

impl EventRecorder for TracingEventRecorder {
    fn record(&self, object: &ManagedResource, event_type: EventType, reason: Reason, message: &str) {
        let key = object.key();
        match event_type {
            EventType::Normal => info!(key = %key, reason = %reason, "{message}"),
            EventType::Warning => warn!(key = %key, reason = %reason, "{message}"),
        }
    }
}

/// An event kept by [`InMemoryEventRecorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub key: ObjectKey,
    pub event_type: EventType,
    pub reason: Reason,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Keeps every event in memory, for tests.
#[derive(Debug, Default)]
pub struct InMemoryEventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl InMemoryEventRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events so far, oldest first.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reasons recorded for `key`, oldest first.
    pub fn reasons_for(&self, key: &ObjectKey) -> Vec<Reason> {
        self.events()
            .into_iter()
            .filter(|e| &e.key == key)
            .map(|e| e.reason)
            .collect()
    }

    /// How many events carry `reason`.
    pub fn count(&self, reason: Reason) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.reason == reason)
            .count()
    }
}

impl EventRecorder for InMemoryEventRecorder {
    fn record(&self, object: &ManagedResource, event_type: EventType, reason: Reason, message: &str) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedEvent {
                key: object.key(),
                event_type,
                reason,
                message: message.to_string(),
                at: Utc::now(),
            });
    }
}
