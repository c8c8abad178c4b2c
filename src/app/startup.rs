use super::types::{ShutdownReason, CAMERA, CLOCK, NETWORK, STORAGE, STREAMING, TIMELAPSE};
use super::{ComponentState, LapsecamOrchestrator};
use crate::camera::build_camera_driver;
use crate::clock::ClockSynchronizer;
use crate::error::{LapsecamError, Result};
use crate::frame::FrameSource;
use crate::network::ConnectivityBootstrap;
use crate::recovery::{Fault, RecoveryAction, Subsystem};
use crate::streaming::StreamServerBuilder;
use crate::timelapse::TimelapsePersister;
use std::sync::Arc;
use tracing::{error, info, warn};

const BYTES_PER_MB: u64 = 1024 * 1024;

impl LapsecamOrchestrator {
    /// Bring the device online: network, time, storage, camera.
    ///
    /// Unrecoverable faults go to the supervisor; an error is returned only
    /// when it asked for a restart that did not end the process.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing lapsecam components");

        {
            let mut states = self.component_states.lock().await;
            for component in [NETWORK, CLOCK, STORAGE, CAMERA, STREAMING, TIMELAPSE] {
                states.insert(component.to_string(), ComponentState::Stopped);
            }
        }

        self.bootstrap_connectivity().await?;
        self.synchronize_clock().await;
        self.prepare_storage().await;
        self.initialize_camera().await?;

        info!("All components initialized successfully");
        Ok(())
    }

    pub(super) async fn bootstrap_connectivity(&self) -> Result<()> {
        let Some(radio) = self.radio.clone() else {
            info!("Connectivity is managed outside lapsecam");
            self.set_component_state(NETWORK, ComponentState::Running)
                .await;
            return Ok(());
        };

        self.set_component_state(NETWORK, ComponentState::Starting)
            .await;

        let bootstrap = Arc::new(ConnectivityBootstrap::from_config(
            radio,
            &self.config.network,
        ));
        self.supervisor
            .register(Subsystem::Network, bootstrap.clone());

        loop {
            match bootstrap.run().await {
                Ok(association) => {
                    self.supervisor.mark_recovered(Subsystem::Network);
                    info!("WiFi connected to {}", association.ssid);
                    self.set_component_state(NETWORK, ComponentState::Running)
                        .await;
                    return Ok(());
                }
                Err(e) => match self.supervisor.handle(Fault::from(&e)).await {
                    RecoveryAction::LocalReset(_) => continue,
                    RecoveryAction::Restart => {
                        self.set_component_state(NETWORK, ComponentState::Failed)
                            .await;
                        return Err(e.into());
                    }
                },
            }
        }
    }

    async fn synchronize_clock(&self) {
        self.set_component_state(CLOCK, ComponentState::Starting)
            .await;

        let synchronizer = ClockSynchronizer::from_config(&self.config.clock);
        if synchronizer.synchronize(&self.clock).await.is_none() {
            warn!("Timestamps follow the device clock until the next start");
        }

        self.set_component_state(CLOCK, ComponentState::Running)
            .await;
    }

    async fn prepare_storage(&self) {
        self.set_component_state(STORAGE, ComponentState::Starting)
            .await;
        self.supervisor
            .register(Subsystem::Storage, self.store.clone());

        match self.store.prepare().await {
            Ok(info) => {
                if let Some(info) = info {
                    info!(
                        "Storage size: {}MB, free: {}MB",
                        info.total_bytes / BYTES_PER_MB,
                        info.free_bytes / BYTES_PER_MB
                    );
                }
                match self.store.list_frames().await {
                    Ok(frames) => info!(
                        "{} frames already in {}",
                        frames.len(),
                        self.store.directory().display()
                    ),
                    Err(e) => warn!("Failed to list existing frames: {}", e),
                }
                self.set_component_state(STORAGE, ComponentState::Running)
                    .await;
            }
            Err(e) => {
                // Writes fail and escalate until the medium shows up
                error!("Storage not ready: {}", e);
                self.set_component_state(STORAGE, ComponentState::Failed)
                    .await;
            }
        }
    }

    async fn initialize_camera(&mut self) -> Result<()> {
        self.set_component_state(CAMERA, ComponentState::Starting)
            .await;

        let driver = loop {
            match build_camera_driver(&self.config.camera).await {
                Ok(driver) => break driver,
                Err(e) => {
                    let fault = Fault::CameraInitFailed {
                        details: e.to_string(),
                    };
                    match self.supervisor.handle(fault).await {
                        RecoveryAction::LocalReset(_) => continue,
                        RecoveryAction::Restart => {
                            self.set_component_state(CAMERA, ComponentState::Failed)
                                .await;
                            return Err(e.into());
                        }
                    }
                }
            }
        };

        let frames = Arc::new(FrameSource::new(
            driver,
            self.config.camera.buffer_count,
            self.config.camera.acquire_timeout(),
        ));
        self.supervisor
            .register(Subsystem::Camera, frames.clone());
        self.frames = Some(frames);

        self.set_component_state(CAMERA, ComponentState::Running)
            .await;
        info!("Camera init success");
        Ok(())
    }

    /// Start the stream server and the timelapse persister
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting lapsecam");

        let frames = self
            .frames
            .clone()
            .ok_or_else(|| LapsecamError::system("Camera must be initialized before start"))?;

        self.set_component_state(TIMELAPSE, ComponentState::Starting)
            .await;
        let persister = TimelapsePersister::new(
            &self.config.timelapse,
            Arc::clone(&frames),
            self.store.clone(),
            self.clock.clone(),
            Arc::clone(&self.supervisor),
        );
        let persister_stats = persister.stats_handle();
        self.persister_stats = Some(Arc::clone(&persister_stats));

        let token = self.cancellation_token.child_token();
        self.tasks
            .push((TIMELAPSE, tokio::spawn(persister.run(token))));
        self.set_component_state(TIMELAPSE, ComponentState::Running)
            .await;

        self.set_component_state(STREAMING, ComponentState::Starting)
            .await;
        let server = StreamServerBuilder::new()
            .config(self.config.stream.clone())
            .frame_source(frames)
            .persister_stats(persister_stats)
            .build()?;

        self.set_component_state(STREAMING, ComponentState::Running)
            .await;

        let token = self.cancellation_token.child_token();
        let shutdown_sender = Arc::clone(&self.shutdown_sender);
        let component_states = Arc::clone(&self.component_states);
        self.tasks.push((
            STREAMING,
            tokio::spawn(async move {
                if let Err(e) = server.start(token).await {
                    error!("Stream server error: {}", e);
                    component_states
                        .lock()
                        .await
                        .insert(STREAMING.to_string(), ComponentState::Failed);
                    if let Some(sender) = shutdown_sender.lock().await.take() {
                        let _ = sender.send(ShutdownReason::Error(e.to_string()));
                    }
                }
            }),
        ));

        info!(
            "Camera ready: http://{}:{}/ (stream), /jpg (snapshot)",
            self.config.stream.ip, self.config.stream.port
        );
        Ok(())
    }
}
