use super::{CameraDriver, PatternCamera};
use crate::config::{CameraBackend, CameraConfig};
use crate::error::{CameraError, LapsecamError, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Builder for the configured camera driver
pub struct CameraDriverBuilder {
    config: Option<CameraConfig>,
}

impl CameraDriverBuilder {
    pub fn new() -> Self {
        Self { config: None }
    }

    pub fn config(mut self, config: CameraConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub async fn build(self) -> Result<Arc<dyn CameraDriver>> {
        let config = self
            .config
            .ok_or_else(|| LapsecamError::system("Camera configuration must be specified"))?;

        Ok(build_camera_driver(&config).await?)
    }
}

impl Default for CameraDriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the driver selected by `config.backend`
pub async fn build_camera_driver(
    config: &CameraConfig,
) -> Result<Arc<dyn CameraDriver>, CameraError> {
    info!(
        "Initializing {:?} camera backend for device {} ({}x{} @ {}fps, quality {})",
        config.backend,
        config.index,
        config.resolution.0,
        config.resolution.1,
        config.fps,
        config.jpeg_quality
    );

    match config.backend {
        CameraBackend::Pattern => {
            warn!("Pattern camera selected: frames are synthetic, not from a sensor");
            Ok(Arc::new(PatternCamera::new(config.clone())))
        }
        CameraBackend::Gstreamer => gstreamer_driver(config).await,
    }
}

#[cfg(all(feature = "camera", target_os = "linux"))]
async fn gstreamer_driver(config: &CameraConfig) -> Result<Arc<dyn CameraDriver>, CameraError> {
    let camera = super::GstCamera::new(config.clone()).await?;
    Ok(Arc::new(camera))
}

#[cfg(not(all(feature = "camera", target_os = "linux")))]
async fn gstreamer_driver(_config: &CameraConfig) -> Result<Arc<dyn CameraDriver>, CameraError> {
    Err(CameraError::Initialization {
        details: "GStreamer backend requires the `camera` feature on Linux".to_string(),
    })
}
