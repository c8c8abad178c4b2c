use super::orchestrator::ShutdownSender;
use super::{LapsecamOrchestrator, ShutdownReason};
use crate::error::{LapsecamError, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

impl LapsecamOrchestrator {
    /// Run until a signal or a fatal component error, then shut down
    pub async fn run(&mut self) -> Result<i32> {
        info!("Lapsecam is running");

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| LapsecamError::system("Shutdown receiver already taken"))?;

        self.setup_signal_handlers();

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| LapsecamError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let mut exit_code = self.shutdown().await?;
        if let ShutdownReason::Error(_) = shutdown_reason {
            exit_code = exit_code.max(1);
        }

        info!("Lapsecam shutdown complete");
        Ok(exit_code)
    }

    /// Request shutdown from outside the signal handlers
    pub async fn request_shutdown(&self, reason: ShutdownReason) {
        send_shutdown(&self.shutdown_sender, reason).await;
    }

    /// Set up signal handlers for graceful shutdown
    fn setup_signal_handlers(&self) {
        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let shutdown_sender = Arc::clone(&self.shutdown_sender);
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            send_shutdown(
                                &shutdown_sender,
                                ShutdownReason::Signal("SIGTERM".to_string()),
                            )
                            .await;
                        }
                    }
                    Err(e) => warn!("Failed to register SIGTERM handler: {}", e),
                }
            });
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        let shutdown_sender = Arc::clone(&self.shutdown_sender);
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                send_shutdown(
                    &shutdown_sender,
                    ShutdownReason::Signal("SIGINT".to_string()),
                )
                .await;
            }
        });
    }
}

async fn send_shutdown(sender: &ShutdownSender, reason: ShutdownReason) {
    if let Some(sender) = sender.lock().await.take() {
        let _ = sender.send(reason);
    }
}
