//! Graceful shutdown signalling
//!
//! The host process owns a [`ShutdownCoordinator`]; long-lived tasks hold a
//! [`ShutdownSignal`] and exit their loops when it fires.

use tokio::sync::broadcast;
use tracing::info;

/// Shutdown coordinator for graceful termination
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    /// Creates a new shutdown coordinator
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx }
    }

    /// Gets a shutdown receiver
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.shutdown_tx.subscribe(),
        }
    }

    /// Signals all subscribers to shut down
    pub fn shutdown(&self) {
        info!("Initiating graceful shutdown");
        let _ = self.shutdown_tx.send(());
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Shutdown signal receiver
pub struct ShutdownSignal {
    receiver: broadcast::Receiver<()>,
}

impl ShutdownSignal {
    /// Waits for the shutdown signal
    ///
    /// Also resolves when the coordinator is dropped, so an orphaned task
    /// never outlives its host.
    pub async fn recv(&mut self) {
        let _ = self.receiver.recv().await;
    }

    /// Checks if shutdown has been signaled (non-blocking)
    pub fn is_shutdown(&mut self) -> bool {
        self.receiver.try_recv().is_ok()
    }
}
