use super::{BootOrchestrator, ShutdownReason};
use crate::error::{Result, StartupError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info};

impl BootOrchestrator {
    /// Run the main application loop with signal handling
    pub async fn run(&self) -> Result<i32> {
        if !self.is_ready() {
            return Err(StartupError::system(
                "cannot serve before startup has completed",
            ));
        }
        info!("Chat service is running");

        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        self.setup_signal_handlers(shutdown_sender);

        let shutdown_reason = tokio::select! {
            reason = shutdown_receiver => reason.map_err(|_| StartupError::System {
                message: "Shutdown channel closed unexpectedly".to_string(),
            })?,
            _ = self.cancellation_token.cancelled() => ShutdownReason::UserRequest,
        };

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let exit_code = self.shutdown().await;

        info!("Chat service shutdown complete");
        Ok(exit_code)
    }

    /// Set up signal handlers for graceful shutdown
    fn setup_signal_handlers(&self, shutdown_sender: oneshot::Sender<ShutdownReason>) {
        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

        // Handle SIGTERM (orchestrator stop) - Unix only
        #[cfg(unix)]
        {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    let shutdown_sender_sigterm = Arc::clone(&shutdown_sender);
                    tokio::spawn(async move {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            let sender = shutdown_sender_sigterm.lock().take();
                            if let Some(sender) = sender {
                                let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                            }
                        }
                    });
                }
                Err(e) => error!("Failed to register SIGTERM handler: {}", e),
            }
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        let shutdown_sender_sigint = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                let sender = shutdown_sender_sigint.lock().take();
                if let Some(sender) = sender {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                }
            }
        });
    }
}
