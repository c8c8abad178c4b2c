use super::types::{ComponentState, ShutdownReason};
use crate::clock::SyncedClock;
use crate::config::LapsecamConfig;
use crate::error::Result;
use crate::frame::FrameSource;
use crate::network::{build_radio, Radio};
use crate::recovery::{DeviceControl, Supervisor, SystemRestart};
use crate::storage::DirectoryStore;
use crate::timelapse::PersisterStatsHandle;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(super) type ShutdownSender = Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

/// Main application coordinator: brings the device online, then runs the
/// stream server and the timelapse persister side by side
pub struct LapsecamOrchestrator {
    pub(super) config: LapsecamConfig,
    pub(super) clock: Arc<SyncedClock>,
    pub(super) supervisor: Arc<Supervisor>,
    pub(super) radio: Option<Arc<dyn Radio>>,
    pub(super) store: Arc<DirectoryStore>,

    // Components
    pub(super) frames: Option<Arc<FrameSource>>,
    pub(super) persister_stats: Option<PersisterStatsHandle>,
    pub(super) tasks: Vec<(&'static str, JoinHandle<()>)>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: ShutdownSender,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl LapsecamOrchestrator {
    /// Create a new orchestrator with the given configuration
    pub async fn new(config: LapsecamConfig) -> Result<Self> {
        let device = Arc::new(SystemRestart::from_config(&config.system));
        Ok(Self::with_device(config, device))
    }

    /// Create an orchestrator that restarts through `device`
    pub fn with_device(config: LapsecamConfig, device: Arc<dyn DeviceControl>) -> Self {
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Self {
            clock: Arc::new(SyncedClock::new(config.clock.utc_offset_seconds)),
            supervisor: Arc::new(Supervisor::new(device, config.system.local_reset_attempts)),
            radio: build_radio(&config.network),
            store: Arc::new(DirectoryStore::from_config(&config.timelapse)),
            config,
            frames: None,
            persister_stats: None,
            tasks: Vec::new(),
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Replace the radio chosen by the configuration
    pub fn set_radio(&mut self, radio: Arc<dyn Radio>) {
        self.radio = Some(radio);
    }

    pub fn clock(&self) -> Arc<SyncedClock> {
        Arc::clone(&self.clock)
    }

    pub fn supervisor(&self) -> Arc<Supervisor> {
        Arc::clone(&self.supervisor)
    }

    pub fn frame_source(&self) -> Option<Arc<FrameSource>> {
        self.frames.clone()
    }

    pub fn persister_stats(&self) -> Option<PersisterStatsHandle> {
        self.persister_stats.clone()
    }
}
