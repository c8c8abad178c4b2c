//! Scriptable stand-ins for hardware used across unit tests

use crate::camera::{encode_pattern_frame, CameraDriver};
use crate::clock::Clock;
use crate::config::{AccessPointConfig, WifiCredentials};
use crate::error::{CameraError, LapsecamError, NetworkError, Result, StorageError};
use crate::network::Radio;
use crate::recovery::{DeviceControl, SubsystemReset};
use crate::storage::{FrameStore, TimestampedFilename};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Decrement `counter` if positive; true when a scripted failure was consumed
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

/// Camera that fails on demand and otherwise returns tiny pattern frames at once
#[derive(Default)]
pub struct ScriptedCamera {
    failures: AtomicU32,
    delay_ms: AtomicU64,
    frames: AtomicU64,
    reinits: AtomicU32,
}

impl ScriptedCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::Release);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::Release);
    }

    pub fn reinit_count(&self) -> u32 {
        self.reinits.load(Ordering::Acquire)
    }
}

#[async_trait]
impl CameraDriver for ScriptedCamera {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn capture(&self) -> Result<Bytes, CameraError> {
        let delay = self.delay_ms.load(Ordering::Acquire);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if take_one(&self.failures) {
            return Err(CameraError::Capture {
                details: "scripted sensor fault".to_string(),
            });
        }

        let id = self.frames.fetch_add(1, Ordering::AcqRel);
        Ok(Bytes::from(encode_pattern_frame(64, 48, id)))
    }

    async fn reinitialize(&self) -> Result<(), CameraError> {
        self.reinits.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Clock that only moves when told to
pub struct ManualClock {
    seconds: AtomicI64,
}

impl ManualClock {
    pub fn new(epoch_seconds: i64) -> Self {
        Self {
            seconds: AtomicI64::new(epoch_seconds),
        }
    }

    pub fn set(&self, epoch_seconds: i64) {
        self.seconds.store(epoch_seconds, Ordering::Release);
    }

    pub fn advance(&self, seconds: i64) {
        self.seconds.fetch_add(seconds, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.seconds.load(Ordering::Acquire), 0)
            .single()
            .unwrap()
    }
}

/// Device control that records restart requests instead of restarting
#[derive(Default)]
pub struct RecordingDevice {
    reasons: Mutex<Vec<String>>,
}

impl RecordingDevice {
    pub fn restart_count(&self) -> usize {
        self.reasons.lock().len()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().clone()
    }
}

#[async_trait]
impl DeviceControl for RecordingDevice {
    async fn restart(&self, reason: &str) {
        self.reasons.lock().push(reason.to_string());
    }
}

/// Subsystem reset that counts invocations
#[derive(Default)]
pub struct CountingReset {
    count: AtomicU32,
    fail: bool,
}

impl CountingReset {
    pub fn failing() -> Self {
        Self {
            count: AtomicU32::new(0),
            fail: true,
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SubsystemReset for CountingReset {
    async fn reset(&self) -> Result<()> {
        self.count.fetch_add(1, Ordering::AcqRel);
        if self.fail {
            Err(LapsecamError::system("scripted reset failure"))
        } else {
            Ok(())
        }
    }
}

/// In-memory frame store with scripted write failures
#[derive(Default)]
pub struct ScriptedStore {
    failures: AtomicU32,
    always_fail: AtomicBool,
    written: Mutex<Vec<TimestampedFilename>>,
    remounts: AtomicU32,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let store = Self::default();
        store.always_fail.store(true, Ordering::Release);
        store
    }

    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::Release);
    }

    pub fn written(&self) -> Vec<TimestampedFilename> {
        self.written.lock().clone()
    }

    pub fn remount_count(&self) -> u32 {
        self.remounts.load(Ordering::Acquire)
    }
}

#[async_trait]
impl FrameStore for ScriptedStore {
    async fn persist(&self, name: &TimestampedFilename, _data: &[u8]) -> Result<PathBuf, StorageError> {
        if self.always_fail.load(Ordering::Acquire) || take_one(&self.failures) {
            return Err(StorageError::Write {
                path: name.file_name(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "scripted write failure"),
            });
        }

        self.written.lock().push(*name);
        Ok(PathBuf::from(name.file_name()))
    }

    async fn remount(&self) -> Result<(), StorageError> {
        self.remounts.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Radio where each network becomes reachable from a given association try
#[derive(Default)]
pub struct ScriptedRadio {
    reachable_from: Mutex<HashMap<String, usize>>,
    calls: Mutex<Vec<String>>,
    fail_access_point: AtomicBool,
    access_points: AtomicU32,
    resets: AtomicU32,
}

impl ScriptedRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// `ssid` associates on its `nth` try (1-based) and every try after
    pub fn reachable_after(&self, ssid: &str, nth: usize) {
        self.reachable_from.lock().insert(ssid.to_string(), nth);
    }

    pub fn fail_access_point(&self) {
        self.fail_access_point.store(true, Ordering::Release);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn access_point_count(&self) -> u32 {
        self.access_points.load(Ordering::Acquire)
    }

    pub fn reset_count(&self) -> u32 {
        self.resets.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Radio for ScriptedRadio {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn associate(&self, network: &WifiCredentials) -> Result<(), NetworkError> {
        let tries = {
            let mut calls = self.calls.lock();
            calls.push(network.ssid.clone());
            calls.iter().filter(|ssid| **ssid == network.ssid).count()
        };

        match self.reachable_from.lock().get(&network.ssid) {
            Some(nth) if tries >= *nth => Ok(()),
            _ => Err(NetworkError::Association {
                ssid: network.ssid.clone(),
                details: "out of range".to_string(),
            }),
        }
    }

    async fn configure_access_point(&self, _ap: &AccessPointConfig) -> Result<(), NetworkError> {
        self.access_points.fetch_add(1, Ordering::AcqRel);
        if self.fail_access_point.load(Ordering::Acquire) {
            return Err(NetworkError::AccessPoint {
                details: "scripted radio refused".to_string(),
            });
        }
        Ok(())
    }

    async fn reset(&self) -> Result<(), NetworkError> {
        self.resets.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
