//! Graceful shutdown coordinator for CommonGround services
//!
//! Turns OS signals (Ctrl+C, SIGTERM) and in-process requests into a single
//! shutdown notification the HTTP server waits on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Shutdown coordinator shared by the server and whoever may stop it
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    /// Atomic flag indicating if shutdown has been initiated
    shutdown_initiated: Arc<AtomicBool>,
    /// Broadcast sender for shutdown signals
    shutdown_tx: broadcast::Sender<()>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Initiate graceful shutdown; later calls are no-ops
    pub fn initiate_shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::Relaxed) {
            info!("Initiating graceful shutdown...");
            // no receivers just means nobody is waiting yet
            let _ = self.shutdown_tx.send(());
        }
    }

    /// Resolve on Ctrl+C, SIGTERM or [`initiate_shutdown`](Self::initiate_shutdown)
    pub async fn wait_for_shutdown_signal(&self) {
        let mut manual = self.subscribe();
        if self.is_shutdown_initiated() {
            return;
        }

        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C signal");
            }
            _ = terminate => {
                info!("Received SIGTERM signal");
            }
            _ = manual.recv() => {
                info!("Shutdown requested");
            }
        }

        self.initiate_shutdown();
    }
}
