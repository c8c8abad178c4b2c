mod builder;
#[cfg(all(feature = "camera", target_os = "linux"))]
mod interface;
mod pattern;

use crate::error::CameraError;
use async_trait::async_trait;
use bytes::Bytes;

pub use builder::{build_camera_driver, CameraDriverBuilder};
#[cfg(all(feature = "camera", target_os = "linux"))]
pub use interface::GstCamera;
pub use pattern::{encode_pattern_frame, PatternCamera};

/// Hardware side of the frame source: produces one encoded JPEG frame per call.
///
/// Implementations own the sensor configuration, which is fixed once the driver
/// has been built. Buffer accounting happens in [`crate::frame::FrameSource`].
#[async_trait]
pub trait CameraDriver: Send + Sync {
    /// Short backend name used in logs and health reports
    fn name(&self) -> &'static str;

    /// Wait for the sensor to produce the next encoded frame
    async fn capture(&self) -> Result<Bytes, CameraError>;

    /// Tear down and rebuild the hardware pipeline with the original settings
    async fn reinitialize(&self) -> Result<(), CameraError>;
}
