pub mod app;
pub mod camera;
pub mod clock;
pub mod config;
pub mod error;
pub mod frame;
pub mod network;
pub mod recovery;
pub mod storage;
pub mod streaming;
pub mod timelapse;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{ComponentState, LapsecamOrchestrator, ShutdownReason};
pub use camera::{CameraDriver, CameraDriverBuilder, PatternCamera};
pub use clock::{Clock, ClockSynchronizer, SyncedClock};
pub use config::LapsecamConfig;
pub use error::{LapsecamError, Result};
pub use frame::{FrameBuffer, FrameSource, FrameSourceStats};
pub use network::{ConnectivityBootstrap, Radio};
pub use recovery::{DeviceControl, Fault, RecoveryAction, Subsystem, Supervisor, SystemRestart};
pub use storage::{DirectoryStore, FrameStore, TimestampedFilename};
pub use streaming::{StreamServer, StreamServerBuilder, StreamStats};
pub use timelapse::{PersisterStats, TimelapsePersister};
