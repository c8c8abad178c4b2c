use super::stats::StreamStats;
use crate::frame::FrameSource;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Multipart boundary token used by the live stream
pub const BOUNDARY: &str = "frame";

/// Header preceding every frame part
pub const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";

const PART_TRAILER: &[u8] = b"\r\n";

/// Pause after a camera fault before the next acquire
const FAULT_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Streaming,
    Terminated,
}

/// One live-stream client.
///
/// Each step acquires a frame, checks the client is still there, writes the
/// part and releases the buffer. The session ends the first time the client
/// is seen gone; a camera fault only pauses it.
pub struct StreamSession {
    frames: Arc<FrameSource>,
    sink: mpsc::Sender<Bytes>,
    stats: Arc<StreamStats>,
    state: SessionState,
    frames_sent: u64,
}

impl StreamSession {
    pub fn new(frames: Arc<FrameSource>, sink: mpsc::Sender<Bytes>, stats: Arc<StreamStats>) -> Self {
        Self {
            frames,
            sink,
            stats,
            state: SessionState::Streaming,
            frames_sent: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn is_connected(&self) -> bool {
        !self.sink.is_closed()
    }

    fn terminate(&mut self) -> SessionState {
        self.state = SessionState::Terminated;
        self.state
    }

    /// Deliver at most one frame
    pub async fn step(&mut self) -> SessionState {
        if self.state == SessionState::Terminated {
            return self.state;
        }

        let buffer = match self.frames.acquire().await {
            Ok(buffer) => buffer,
            Err(e) => {
                self.stats.record_camera_fault();
                warn!("Camera capture failed: {}", e);
                if !self.is_connected() {
                    return self.terminate();
                }
                tokio::time::sleep(FAULT_PAUSE).await;
                return self.state;
            }
        };

        if !self.is_connected() {
            self.frames.release(buffer);
            return self.terminate();
        }

        let frame_size = buffer.len();
        let delivered = self.write_part(buffer.bytes()).await;
        self.frames.release(buffer);

        if !delivered {
            return self.terminate();
        }

        self.frames_sent += 1;
        self.stats.record_frame(frame_size);

        if !self.is_connected() {
            return self.terminate();
        }
        self.state
    }

    /// Queue one multipart part; false once the client is gone
    async fn write_part(&self, frame: Bytes) -> bool {
        for chunk in [
            Bytes::from_static(PART_HEADER),
            frame,
            Bytes::from_static(PART_TRAILER),
        ] {
            if self.sink.send(chunk).await.is_err() {
                return false;
            }
        }
        true
    }

    /// Stream until the client leaves or the server shuts down
    pub async fn run(mut self, shutdown: CancellationToken) -> u64 {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Server shutting down, closing stream");
                    break;
                }
                state = self.step() => {
                    if state == SessionState::Terminated {
                        break;
                    }
                }
            }
        }
        self.terminate();
        self.frames_sent
    }
}
