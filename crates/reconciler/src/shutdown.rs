//! Graceful shutdown handling.
//!
//! Turns SIGTERM/SIGINT (or a programmatic request) into a single stop
//! signal that the controller waits on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{error, info};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM signal received
    Sigterm,
    /// SIGINT signal received (Ctrl+C)
    Sigint,
    /// Programmatic shutdown requested
    Programmatic,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sigterm => write!(f, "SIGTERM"),
            Self::Sigint => write!(f, "SIGINT"),
            Self::Programmatic => write!(f, "PROGRAMMATIC"),
        }
    }
}

/// Fans a shutdown request out to every waiter, late subscribers included.
pub struct ShutdownCoordinator {
    initiated: AtomicBool,
    signal: watch::Sender<Option<ShutdownSignal>>,
}

impl ShutdownCoordinator {
    /// Create a coordinator with no shutdown requested.
    #[must_use]
    pub fn new() -> Self {
        let (signal, _) = watch::channel(None);
        Self {
            initiated: AtomicBool::new(false),
            signal,
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.initiated.load(Ordering::Acquire)
    }

    /// Request shutdown. Only the first request is recorded.
    pub fn initiate_shutdown(&self, signal: ShutdownSignal) {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("Shutdown already in progress, ignoring duplicate signal");
            return;
        }
        info!(signal = %signal, "Initiating graceful shutdown");
        self.signal.send_replace(Some(signal));
    }

    /// Wait until shutdown is requested and return the signal that caused it.
    pub async fn wait(&self) -> ShutdownSignal {
        let mut rx = self.signal.subscribe();
        loop {
            if let Some(signal) = *rx.borrow_and_update() {
                return signal;
            }
            if rx.changed().await.is_err() {
                return ShutdownSignal::Programmatic;
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Install OS signal handlers (SIGTERM, SIGINT)
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) -> tokio::task::JoinHandle<()> {
    info!("Installing OS signal handlers");

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    return;
                }
            };
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGINT handler");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => coordinator.initiate_shutdown(ShutdownSignal::Sigterm),
                _ = sigint.recv() => coordinator.initiate_shutdown(ShutdownSignal::Sigint),
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            coordinator.initiate_shutdown(ShutdownSignal::Sigint);
        }
    })
}

/// Resolve once `flag` reads `true`. Returns `false` if the sender went away
/// first.
pub(crate) async fn until_true(flag: &mut watch::Receiver<bool>) -> bool {
    loop {
        if *flag.borrow_and_update() {
            return true;
        }
        if flag.changed().await.is_err() {
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_initiate_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_shutdown_initiated());

        coordinator.initiate_shutdown(ShutdownSignal::Programmatic);
        assert!(coordinator.is_shutdown_initiated());
        assert_eq!(coordinator.wait().await, ShutdownSignal::Programmatic);
    }

    #[tokio::test]
    async fn test_duplicate_shutdown_keeps_first_signal() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.initiate_shutdown(ShutdownSignal::Sigint);
        coordinator.initiate_shutdown(ShutdownSignal::Sigterm);
        assert_eq!(coordinator.wait().await, ShutdownSignal::Sigint);
    }

    #[tokio::test]
    async fn test_waiter_is_woken() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.initiate_shutdown(ShutdownSignal::Sigterm);

        let signal = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(signal, Ok(Ok(ShutdownSignal::Sigterm))));
    }

    #[tokio::test]
    async fn test_until_true_sees_flag() {
        let (tx, mut rx) = watch::channel(false);
        tx.send_replace(true);
        assert!(until_true(&mut rx).await);

        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        assert!(!until_true(&mut rx).await);
    }
}
