//! Graceful Shutdown Manager
//!
//! Hands out cancellation tokens to long-running components (the idle reaper,
//! the HTTP server) and flips them all when the process is asked to stop.
//!
//! ## Usage
//!
//! ```ignore
//! let shutdown = ShutdownController::new();
//!
//! let token = shutdown.token();
//! tokio::spawn(reaper.run(token));
//!
//! shutdown.shutdown();
//! ```

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shutdown controller for coordinating graceful shutdown
pub struct ShutdownController {
    /// Parent cancellation token for all components
    cancel_token: CancellationToken,
}

impl ShutdownController {
    /// Create a new shutdown controller
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cancel_token: CancellationToken::new(),
        })
    }

    /// Get a cancellation token for a component
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Cancel every token handed out by this controller. Only the first call
    /// has an effect.
    pub fn shutdown(&self) {
        if self.cancel_token.is_cancelled() {
            debug!("Shutdown already initiated");
            return;
        }
        info!("Shutdown initiated");
        self.cancel_token.cancel();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
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
    }
}

/// Wait for a shutdown signal, then trigger the controller
pub async fn shutdown_signal_with_controller(controller: Arc<ShutdownController>) {
    wait_for_shutdown_signal().await;
    controller.shutdown();
}
