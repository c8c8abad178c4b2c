use super::CameraDriver;
use crate::config::CameraConfig;
use crate::error::CameraError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Synthetic camera producing small, structurally valid JPEG frames at the
/// configured frame rate. Used on development hosts and in tests.
pub struct PatternCamera {
    config: CameraConfig,
    frame_interval: Duration,
    next_frame_at: Mutex<Option<Instant>>,
    frame_counter: AtomicU64,
}

impl PatternCamera {
    pub fn new(config: CameraConfig) -> Self {
        let frame_interval = Duration::from_micros(1_000_000u64 / config.fps.max(1) as u64);
        Self {
            config,
            frame_interval,
            next_frame_at: Mutex::new(None),
            frame_counter: AtomicU64::new(0),
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_counter.load(Ordering::Relaxed)
    }

    /// Sleep until the sensor would have produced the next frame
    async fn pace(&self) {
        let mut next = self.next_frame_at.lock().await;
        let now = Instant::now();
        let due = next.unwrap_or(now);
        if due > now {
            tokio::time::sleep_until(due).await;
        }
        *next = Some(due.max(now) + self.frame_interval);
    }
}

#[async_trait]
impl CameraDriver for PatternCamera {
    fn name(&self) -> &'static str {
        "pattern"
    }

    async fn capture(&self) -> Result<Bytes, CameraError> {
        self.pace().await;
        let frame_id = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        let (width, height) = self.config.resolution;
        let jpeg = encode_pattern_frame(width, height, frame_id);
        trace!("Generated pattern frame {} ({} bytes)", frame_id, jpeg.len());
        Ok(Bytes::from(jpeg))
    }

    async fn reinitialize(&self) -> Result<(), CameraError> {
        debug!("Resetting pattern camera pacing");
        *self.next_frame_at.lock().await = None;
        Ok(())
    }
}

/// Build a minimal baseline JPEG whose comment segment carries the frame id
pub fn encode_pattern_frame(width: u32, height: u32, frame_id: u64) -> Vec<u8> {
    let comment = format!("lapsecam pattern frame {}", frame_id);
    let mut jpeg = Vec::with_capacity(64 + comment.len());

    // SOI + APP0/JFIF
    jpeg.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]);
    jpeg.extend_from_slice(b"JFIF\0");
    jpeg.extend_from_slice(&[0x01, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00]);

    // COM
    let com_len = (comment.len() + 2) as u16;
    jpeg.extend_from_slice(&[0xFF, 0xFE]);
    jpeg.extend_from_slice(&com_len.to_be_bytes());
    jpeg.extend_from_slice(comment.as_bytes());

    // SOF0, single grayscale component
    jpeg.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 0x08]);
    jpeg.extend_from_slice(&(height.min(u16::MAX as u32) as u16).to_be_bytes());
    jpeg.extend_from_slice(&(width.min(u16::MAX as u32) as u16).to_be_bytes());
    jpeg.extend_from_slice(&[0x01, 0x01, 0x11, 0x00]);

    // EOI
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    jpeg
}
