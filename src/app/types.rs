/// Component lifecycle states
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// System shutdown reason
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
}

/// Names under which components report their state
pub(super) const NETWORK: &str = "network";
pub(super) const CLOCK: &str = "clock";
pub(super) const STORAGE: &str = "storage";
pub(super) const CAMERA: &str = "camera";
pub(super) const STREAMING: &str = "streaming";
pub(super) const TIMELAPSE: &str = "timelapse";
