use crate::camera::CameraDriver;
use crate::error::{CameraError, Result};
use crate::recovery::SubsystemReset;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// One encoded JPEG frame checked out of the hardware buffer pool.
///
/// The buffer owns its pool slot. Handing it to [`FrameSource::release`] or
/// dropping it returns the slot, so every exit path releases exactly once.
pub struct FrameBuffer {
    id: u64,
    captured_at: SystemTime,
    data: Bytes,
    ledger: Arc<PoolLedger>,
    _slot: OwnedSemaphorePermit,
}

impl FrameBuffer {
    /// Sequence number assigned at acquisition
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// Encoded image bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Cheap handle to the encoded bytes that outlives the buffer
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .finish()
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        self.ledger.released.fetch_add(1, Ordering::AcqRel);
        trace!("Frame buffer {} released", self.id);
    }
}

#[derive(Debug, Default)]
struct PoolLedger {
    acquired: AtomicU64,
    released: AtomicU64,
    faults: AtomicU64,
}

/// Snapshot of the frame source accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameSourceStats {
    pub pool_depth: usize,
    pub acquired: u64,
    pub released: u64,
    pub faults: u64,
    /// Pool slots held, by checked-out buffers and captures in progress
    pub outstanding: u64,
}

/// Sole producer of frame buffers, shared by every consumer.
///
/// The bounded pool is the serialization point between concurrent consumers:
/// an acquire waits for a free slot, and a consumer that never releases starves
/// everyone else.
pub struct FrameSource {
    driver: Arc<dyn CameraDriver>,
    pool: Arc<Semaphore>,
    pool_depth: usize,
    acquire_timeout: Duration,
    ledger: Arc<PoolLedger>,
    next_id: AtomicU64,
}

impl FrameSource {
    pub fn new(driver: Arc<dyn CameraDriver>, pool_depth: usize, acquire_timeout: Duration) -> Self {
        let pool_depth = pool_depth.max(1);
        debug!(
            "Frame source ready ({} backend, pool depth {}, acquire timeout {:?})",
            driver.name(),
            pool_depth,
            acquire_timeout
        );
        Self {
            driver,
            pool: Arc::new(Semaphore::new(pool_depth)),
            pool_depth,
            acquire_timeout,
            ledger: Arc::new(PoolLedger::default()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Check out one frame.
    ///
    /// Fails with [`CameraError::PoolExhausted`] when no slot frees up in time,
    /// or with the driver's fault. A failed acquire holds nothing.
    pub async fn acquire(&self) -> Result<FrameBuffer, CameraError> {
        let slot = match timeout(self.acquire_timeout, Arc::clone(&self.pool).acquire_owned()).await
        {
            Ok(Ok(slot)) => slot,
            Ok(Err(_)) => return Err(CameraError::NotRunning),
            Err(_) => {
                self.ledger.faults.fetch_add(1, Ordering::AcqRel);
                warn!(
                    "No frame buffer released within {:?} ({} outstanding)",
                    self.acquire_timeout,
                    self.stats().outstanding
                );
                return Err(CameraError::PoolExhausted {
                    timeout: self.acquire_timeout,
                });
            }
        };

        let data = match timeout(self.acquire_timeout, self.driver.capture()).await {
            Ok(Ok(data)) => data,
            Ok(Err(e)) => {
                self.ledger.faults.fetch_add(1, Ordering::AcqRel);
                return Err(e);
            }
            Err(_) => {
                self.ledger.faults.fetch_add(1, Ordering::AcqRel);
                return Err(CameraError::FrameTimeout {
                    timeout: self.acquire_timeout,
                });
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.ledger.acquired.fetch_add(1, Ordering::AcqRel);
        trace!("Frame buffer {} acquired ({} bytes)", id, data.len());

        Ok(FrameBuffer {
            id,
            captured_at: SystemTime::now(),
            data,
            ledger: Arc::clone(&self.ledger),
            _slot: slot,
        })
    }

    /// Return a buffer to the pool
    pub fn release(&self, buffer: FrameBuffer) {
        drop(buffer);
    }

    /// Rebuild the camera pipeline without touching outstanding buffers
    pub async fn reinitialize(&self) -> Result<(), CameraError> {
        debug!("Reinitializing {} camera backend", self.driver.name());
        self.driver.reinitialize().await
    }

    pub fn backend(&self) -> &'static str {
        self.driver.name()
    }

    /// Counters may be mid-update under concurrent use; `outstanding` is read
    /// from the pool itself and never exceeds `pool_depth`.
    pub fn stats(&self) -> FrameSourceStats {
        let in_use = self.pool_depth.saturating_sub(self.pool.available_permits());
        FrameSourceStats {
            pool_depth: self.pool_depth,
            acquired: self.ledger.acquired.load(Ordering::Acquire),
            released: self.ledger.released.load(Ordering::Acquire),
            faults: self.ledger.faults.load(Ordering::Acquire),
            outstanding: in_use as u64,
        }
    }
}

#[async_trait]
impl SubsystemReset for FrameSource {
    async fn reset(&self) -> Result<()> {
        self.reinitialize().await?;
        Ok(())
    }
}
