use super::types::{CAMERA, CLOCK, NETWORK, STORAGE};
use super::{ComponentState, LapsecamOrchestrator};
use crate::error::Result;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

impl LapsecamOrchestrator {
    /// Perform graceful shutdown of all components
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        // Cancel all background tasks
        self.cancellation_token.cancel();

        let mut exit_code = 0;

        // Stop components in reverse start order
        while let Some((component, mut task)) = self.tasks.pop() {
            info!("Stopping {} component", component);
            self.set_component_state(component, ComponentState::Stopping)
                .await;

            match timeout(STOP_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {
                    if self.get_component_state(component).await == Some(ComponentState::Failed) {
                        error!("{} component had failed before shutdown", component);
                        exit_code = 1;
                    } else {
                        self.set_component_state(component, ComponentState::Stopped)
                            .await;
                        info!("{} component stopped", component);
                    }
                }
                Ok(Err(e)) => {
                    self.set_component_state(component, ComponentState::Failed)
                        .await;
                    error!("{} component task failed: {}", component, e);
                    exit_code = 1;
                }
                Err(_) => {
                    task.abort();
                    self.set_component_state(component, ComponentState::Failed)
                        .await;
                    error!("{} component stop timeout", component);
                    exit_code = 1;
                }
            }
        }

        let outstanding = self
            .frames
            .as_ref()
            .map(|frames| frames.stats().outstanding)
            .unwrap_or(0);
        if outstanding > 0 {
            error!("{} frame buffers still checked out at shutdown", outstanding);
        }

        for component in [CAMERA, STORAGE, CLOCK, NETWORK] {
            if self.get_component_state(component).await == Some(ComponentState::Running) {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
            }
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }
}
