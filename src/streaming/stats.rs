use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by every request handler
#[derive(Debug, Default)]
pub struct StreamStats {
    active_clients: AtomicU64,
    total_clients: AtomicU64,
    rejected_clients: AtomicU64,
    frames_streamed: AtomicU64,
    bytes_streamed: AtomicU64,
    snapshots: AtomicU64,
    camera_faults: AtomicU64,
}

impl StreamStats {
    pub fn client_connected(&self) {
        self.active_clients.fetch_add(1, Ordering::AcqRel);
        self.total_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self) {
        self.active_clients.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn client_rejected(&self) {
        self.rejected_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame(&self, frame_size: usize) {
        self.frames_streamed.fetch_add(1, Ordering::Relaxed);
        self.bytes_streamed
            .fetch_add(frame_size as u64, Ordering::Relaxed);
    }

    pub fn record_snapshot(&self) {
        self.snapshots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_camera_fault(&self) {
        self.camera_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_clients(&self) -> u64 {
        self.active_clients.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> StreamingStats {
        StreamingStats {
            active_clients: self.active_clients.load(Ordering::Acquire),
            total_clients: self.total_clients.load(Ordering::Relaxed),
            rejected_clients: self.rejected_clients.load(Ordering::Relaxed),
            frames_streamed: self.frames_streamed.load(Ordering::Relaxed),
            bytes_streamed: self.bytes_streamed.load(Ordering::Relaxed),
            snapshots: self.snapshots.load(Ordering::Relaxed),
            camera_faults: self.camera_faults.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`StreamStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamingStats {
    pub active_clients: u64,
    pub total_clients: u64,
    pub rejected_clients: u64,
    pub frames_streamed: u64,
    pub bytes_streamed: u64,
    pub snapshots: u64,
    pub camera_faults: u64,
}
