use super::BootOrchestrator;
use tracing::info;

impl BootOrchestrator {
    /// Perform graceful shutdown of all started components
    ///
    /// Cleanup runs in exact reverse of the resolved startup order. Returns 1 if any
    /// cleanup failed or timed out.
    pub async fn shutdown(&self) -> i32 {
        info!("Beginning graceful shutdown");

        self.handle.set_ready(false);
        self.cancellation_token.cancel();

        let (stopped, exit_code) = self.manager.shutdown().await;
        info!(
            "Stopped {} components with exit code {}: {:?}",
            stopped.len(),
            exit_code,
            stopped
        );
        exit_code
    }

    /// Ask a running orchestrator to shut down
    pub fn request_shutdown(&self) {
        self.cancellation_token.cancel();
    }
}
