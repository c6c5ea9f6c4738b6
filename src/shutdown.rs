//! Graceful Shutdown Module
//!
//! Broadcast-based shutdown coordination: the coordinator listens for SIGINT
//! and SIGTERM and fans the signal out to every subscribed component.

use crate::{ProxyError, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

/// Shutdown coordinator for graceful system shutdown
pub struct ShutdownCoordinator {
    sender: broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    /// Hand out a signal handle for a component to wait on.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Trigger shutdown for all subscribers.
    pub fn shutdown(&self) {
        // Send fails only when no subscriber is left, which is fine
        let _ = self.sender.send(());
    }

    /// Block until SIGINT or SIGTERM arrives, then broadcast shutdown.
    pub async fn listen_for_signals(&self) -> Result<()> {
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .map_err(|e| ProxyError::IoError(format!("Failed to create SIGINT handler: {}", e)))?;
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .map_err(|e| ProxyError::IoError(format!("Failed to create SIGTERM handler: {}", e)))?;

        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
            _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
        }

        self.shutdown();
        Ok(())
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for components to wait for the shutdown broadcast
pub struct ShutdownSignal {
    receiver: broadcast::Receiver<()>,
}

impl ShutdownSignal {
    pub async fn wait_for_shutdown(&mut self) {
        // RecvError means the coordinator is gone; treat as shutdown either way
        let _ = self.receiver.recv().await;
    }
}
