//! Typed change notifications.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::{ManagedResource, ObjectKey};

/// A single change observed in the store. Delivery is at-least-once with no
/// ordering guarantee across keys.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// Object was created.
    Added(Arc<ManagedResource>),
    /// Object was written; carries the new state.
    Updated(Arc<ManagedResource>),
    /// Object was physically removed; carries its final state.
    Deleted(Arc<ManagedResource>),
}

impl WatchEvent {
    /// The object this event carries.
    #[must_use]
    pub fn object(&self) -> &Arc<ManagedResource> {
        match self {
            Self::Added(obj) | Self::Updated(obj) | Self::Deleted(obj) => obj,
        }
    }

    /// Key of the affected object.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        self.object().key()
    }

    /// Short event name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Updated(_) => "updated",
            Self::Deleted(_) => "deleted",
        }
    }
}

/// Why a watch stopped yielding events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WatchError {
    /// The consumer fell behind and `skipped` events were dropped.
    #[error("watch lagged, {skipped} events dropped")]
    Lagged { skipped: u64 },
    /// The store side of the stream is gone.
    #[error("watch closed")]
    Closed,
}

/// Subscription handle for receiving store changes.
pub struct WatchStream {
    receiver: broadcast::Receiver<WatchEvent>,
}

impl WatchStream {
    /// Wrap a broadcast receiver.
    #[must_use]
    pub const fn new(receiver: broadcast::Receiver<WatchEvent>) -> Self {
        Self { receiver }
    }

    /// Receive the next event.
    ///
    /// # Errors
    ///
    /// `WatchError::Lagged` means events were lost and the consumer should
    /// relist; the stream stays usable. `WatchError::Closed` is terminal.
    pub async fn recv(&mut self) -> Result<WatchEvent, WatchError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Lagged(skipped) => WatchError::Lagged { skipped },
            broadcast::error::RecvError::Closed => WatchError::Closed,
        })
    }

    /// Try to receive an event without waiting.
    #[must_use]
    pub fn try_recv(&mut self) -> Option<WatchEvent> {
        self.receiver.try_recv().ok()
    }
}
