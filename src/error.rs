use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LapsecamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("System error: {message}")]
    System { message: String },
}

impl LapsecamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }
}

/// Faults raised by the camera hardware or the frame buffer pool
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("Camera initialization failed: {details}")]
    Initialization { details: String },

    #[error("Camera capture failed: {details}")]
    Capture { details: String },

    #[error("No frame buffer became available within {timeout:?}")]
    PoolExhausted { timeout: Duration },

    #[error("Camera produced no frame within {timeout:?}")]
    FrameTimeout { timeout: Duration },

    #[error("Camera is not running")]
    NotRunning,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage root {path} is not available: {source}")]
    Unavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error("Association with {ssid} failed: {details}")]
    Association { ssid: String, details: String },

    #[error("Access point configuration failed: {details}")]
    AccessPoint { details: String },

    #[error("Radio command failed: {details}")]
    Command { details: String },

    #[error("No candidate network reachable after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

#[derive(Error, Debug)]
pub enum ClockError {
    #[error("Failed to resolve time server {server}: {details}")]
    Resolve { server: String, details: String },

    #[error("Time request to {server} failed: {source}")]
    Io {
        server: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Time server {server} did not answer within {timeout:?}")]
    Timeout { server: String, timeout: Duration },

    #[error("Invalid time server response: {details}")]
    InvalidResponse { details: String },
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream server startup failed: {details}")]
    StartupFailed { details: String },

    #[error("Server failed: {details}")]
    ServerFailed { details: String },
}

pub type Result<T, E = LapsecamError> = std::result::Result<T, E>;
