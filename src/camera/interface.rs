use super::CameraDriver;
use crate::config::CameraConfig;
use crate::error::CameraError;
use async_trait::async_trait;
use bytes::Bytes;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// V4L2 camera driven through a GStreamer pipeline ending in an appsink.
///
/// The appsink keeps at most `buffer_count` encoded frames and drops the
/// oldest when nobody pulls, so a capture always returns a recent frame.
pub struct GstCamera {
    config: CameraConfig,
    pipeline: Mutex<Option<(Pipeline, AppSink)>>,
}

impl GstCamera {
    /// Create the pipeline and bring it to the playing state
    pub async fn new(config: CameraConfig) -> Result<Self, CameraError> {
        gstreamer::init().map_err(|e| CameraError::Initialization {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        let camera = Self {
            config,
            pipeline: Mutex::new(None),
        };
        camera.start_pipeline()?;
        Ok(camera)
    }

    /// Build GStreamer pipeline string for JPEG capture
    fn build_pipeline_string(&self) -> String {
        let (width, height) = self.config.resolution;
        // Sensor quality scale is 0 (best) to 63; jpegenc uses 0 to 100 (best)
        let quality = 100 - (self.config.jpeg_quality.min(63) * 100 / 63);

        format!(
            "v4l2src device=/dev/video{} io-mode=mmap ! \
             video/x-raw,width={},height={},framerate={}/1 ! \
             videoconvert ! jpegenc quality={} ! \
             appsink name=sink sync=false max-buffers={} drop=true emit-signals=false",
            self.config.index,
            width,
            height,
            self.config.fps,
            quality,
            self.config.buffer_count.max(1)
        )
    }

    fn start_pipeline(&self) -> Result<(), CameraError> {
        let pipeline_desc = self.build_pipeline_string();
        info!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| CameraError::Initialization {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CameraError::Initialization {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| CameraError::Initialization {
                details: "Pipeline has no appsink".to_string(),
            })?
            .downcast::<AppSink>()
            .map_err(|_| CameraError::Initialization {
                details: "Failed to downcast to AppSink".to_string(),
            })?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| CameraError::Initialization {
                details: format!("Failed to start pipeline: {}", e),
            })?;

        info!("GStreamer pipeline started");
        *self.pipeline.lock() = Some((pipeline, appsink));
        Ok(())
    }

    fn stop_pipeline(&self) {
        if let Some((pipeline, _)) = self.pipeline.lock().take() {
            if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                warn!("Failed to stop GStreamer pipeline: {}", e);
            }
        }
    }

    fn frame_timeout(&self) -> Duration {
        self.config.acquire_timeout()
    }
}

#[async_trait]
impl CameraDriver for GstCamera {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    async fn capture(&self) -> Result<Bytes, CameraError> {
        let appsink = self
            .pipeline
            .lock()
            .as_ref()
            .map(|(_, sink)| sink.clone())
            .ok_or(CameraError::NotRunning)?;

        let timeout = self.frame_timeout();
        let wait = gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64);

        let sample = tokio::task::spawn_blocking(move || appsink.try_pull_sample(wait))
            .await
            .map_err(|e| CameraError::Capture {
                details: format!("Capture task failed: {}", e),
            })?
            .ok_or(CameraError::FrameTimeout { timeout })?;

        let buffer = sample.buffer().ok_or_else(|| CameraError::Capture {
            details: "No buffer in sample".to_string(),
        })?;

        let map = buffer.map_readable().map_err(|e| CameraError::Capture {
            details: format!("Failed to map buffer: {}", e),
        })?;

        trace!("Captured JPEG frame ({} bytes)", map.len());
        Ok(Bytes::copy_from_slice(map.as_slice()))
    }

    async fn reinitialize(&self) -> Result<(), CameraError> {
        debug!("Reinitializing GStreamer pipeline");
        self.stop_pipeline();
        self.start_pipeline()
    }
}

impl Drop for GstCamera {
    fn drop(&mut self) {
        self.stop_pipeline();
    }
}
