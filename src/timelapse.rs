use crate::clock::Clock;
use crate::config::TimelapseConfig;
use crate::frame::FrameSource;
use crate::recovery::{Fault, RecoveryAction, Subsystem, Supervisor};
use crate::storage::{FrameStore, TimestampedFilename};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Persister counters exposed on the health endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersisterStats {
    pub frames_written: u64,
    pub write_failures: u64,
    pub capture_failures: u64,
    pub consecutive_write_failures: u32,
    pub consecutive_capture_failures: u32,
    pub escalations: u64,
    pub last_capture: Option<i64>,
    pub last_file: Option<String>,
}

pub type PersisterStatsHandle = Arc<Mutex<PersisterStats>>;

/// Result of one persister iteration
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The interval has not elapsed yet
    Idle,
    Persisted(PathBuf),
    WriteFailed {
        consecutive: u32,
        escalated: Option<RecoveryAction>,
    },
    CaptureFailed {
        consecutive: u32,
        escalated: Option<RecoveryAction>,
    },
}

/// Periodically captures one frame and writes it to storage as `<epoch>.jpg`.
///
/// A capture happens when none has happened yet, when strictly more than
/// `interval_seconds` have passed since the last one, or when the clock has
/// stepped back behind the last one. The wall-clock second of the capture
/// names the file. More than `max_write_failures` consecutive failed writes
/// hand a fault to the supervisor; so do more than `max_capture_failures`
/// consecutive camera faults.
pub struct TimelapsePersister {
    frames: Arc<FrameSource>,
    store: Arc<dyn FrameStore>,
    clock: Arc<dyn Clock>,
    supervisor: Arc<Supervisor>,
    interval_seconds: i64,
    poll_interval: Duration,
    max_write_failures: u32,
    max_capture_failures: u32,
    last_capture: Option<i64>,
    write_failures: u32,
    capture_failures: u32,
    stats: PersisterStatsHandle,
}

impl TimelapsePersister {
    pub fn new(
        config: &TimelapseConfig,
        frames: Arc<FrameSource>,
        store: Arc<dyn FrameStore>,
        clock: Arc<dyn Clock>,
        supervisor: Arc<Supervisor>,
    ) -> Self {
        Self {
            frames,
            store,
            clock,
            supervisor,
            interval_seconds: config.interval_seconds as i64,
            poll_interval: config.poll_interval(),
            max_write_failures: config.max_write_failures,
            max_capture_failures: config.max_capture_failures,
            last_capture: None,
            write_failures: 0,
            capture_failures: 0,
            stats: Arc::new(Mutex::new(PersisterStats::default())),
        }
    }

    /// Shared view of the counters, readable while the persister runs
    pub fn stats_handle(&self) -> PersisterStatsHandle {
        Arc::clone(&self.stats)
    }

    pub fn write_failures(&self) -> u32 {
        self.write_failures
    }

    pub fn capture_failures(&self) -> u32 {
        self.capture_failures
    }

    fn capture_due(&self, now: i64) -> bool {
        match self.last_capture {
            None => true,
            Some(last) if now < last => {
                warn!(
                    "Clock stepped back {}s since the last capture, capturing now",
                    last - now
                );
                true
            }
            Some(last) => now - last > self.interval_seconds,
        }
    }

    /// Run one iteration without the trailing poll delay
    pub async fn tick(&mut self) -> TickOutcome {
        let now = self.clock.epoch_seconds();
        if !self.capture_due(now) {
            return TickOutcome::Idle;
        }

        debug!("Taking picture at {}", now);
        let buffer = match self.frames.acquire().await {
            Ok(buffer) => buffer,
            Err(e) => {
                self.last_capture = Some(now);
                self.capture_failures += 1;
                warn!(
                    "Camera capture failed ({} in a row): {}",
                    self.capture_failures, e
                );

                let consecutive = self.capture_failures;
                let escalated = if consecutive > self.max_capture_failures {
                    self.capture_failures = 0;
                    Some(
                        self.supervisor
                            .handle(Fault::PersistentCaptureFailure { consecutive })
                            .await,
                    )
                } else {
                    None
                };
                self.record(|stats| {
                    stats.capture_failures += 1;
                    stats.consecutive_capture_failures = consecutive;
                    stats.escalations += escalated.is_some() as u64;
                    stats.last_capture = Some(now);
                });
                return TickOutcome::CaptureFailed {
                    consecutive,
                    escalated,
                };
            }
        };

        self.capture_failures = 0;
        self.supervisor.mark_recovered(Subsystem::Camera);

        let name = TimestampedFilename::from_epoch_seconds(now);
        let result = self.store.persist(&name, buffer.data()).await;
        self.frames.release(buffer);
        self.last_capture = Some(now);

        match result {
            Ok(path) => {
                self.write_failures = 0;
                self.supervisor.mark_recovered(Subsystem::Storage);
                info!("Saved file to path: {}", path.display());
                self.record(|stats| {
                    stats.frames_written += 1;
                    stats.consecutive_write_failures = 0;
                    stats.consecutive_capture_failures = 0;
                    stats.last_capture = Some(now);
                    stats.last_file = Some(name.file_name());
                });
                TickOutcome::Persisted(path)
            }
            Err(e) => {
                self.write_failures += 1;
                warn!(
                    "Failed to save {} ({} in a row): {}",
                    name, self.write_failures, e
                );

                let consecutive = self.write_failures;
                let escalated = if consecutive > self.max_write_failures {
                    self.write_failures = 0;
                    Some(
                        self.supervisor
                            .handle(Fault::PersistentWriteFailure { consecutive })
                            .await,
                    )
                } else {
                    None
                };
                self.record(|stats| {
                    stats.write_failures += 1;
                    stats.consecutive_write_failures = consecutive;
                    stats.consecutive_capture_failures = 0;
                    stats.escalations += escalated.is_some() as u64;
                    stats.last_capture = Some(now);
                });
                TickOutcome::WriteFailed {
                    consecutive,
                    escalated,
                }
            }
        }
    }

    /// Poll until cancelled
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Timelapse persister started (every {}s, polling every {:?})",
            self.interval_seconds, self.poll_interval
        );

        while !cancel.is_cancelled() {
            self.tick().await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Timelapse persister stopped");
    }

    fn record(&self, update: impl FnOnce(&mut PersisterStats)) {
        update(&mut self.stats.lock());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LapsecamConfig;
    use crate::storage::DirectoryStore;
    use crate::testing::{ManualClock, RecordingDevice, ScriptedCamera, ScriptedStore};

    const T0: i64 = 1_700_000_000;

    struct Harness {
        camera: Arc<ScriptedCamera>,
        frames: Arc<FrameSource>,
        clock: Arc<ManualClock>,
        device: Arc<RecordingDevice>,
        supervisor: Arc<Supervisor>,
    }

    impl Harness {
        fn new(max_local_resets: u32) -> Self {
            let camera = Arc::new(ScriptedCamera::new());
            let frames = Arc::new(FrameSource::new(
                camera.clone(),
                4,
                Duration::from_millis(500),
            ));
            let device = Arc::new(RecordingDevice::default());
            Self {
                camera,
                frames,
                clock: Arc::new(ManualClock::new(T0)),
                supervisor: Arc::new(Supervisor::new(device.clone(), max_local_resets)),
                device,
            }
        }

        fn persister(&self, store: Arc<dyn FrameStore>) -> TimelapsePersister {
            TimelapsePersister::new(
                &LapsecamConfig::default().timelapse,
                Arc::clone(&self.frames),
                store,
                self.clock.clone(),
                Arc::clone(&self.supervisor),
            )
        }
    }

    #[tokio::test]
    async fn test_capture_cadence() {
        let harness = Harness::new(2);
        let store = Arc::new(ScriptedStore::new());
        let mut persister = harness.persister(store.clone());

        assert!(matches!(persister.tick().await, TickOutcome::Persisted(_)));

        harness.clock.set(T0 + 3);
        assert_eq!(persister.tick().await, TickOutcome::Idle);

        // Exactly the interval is not enough
        harness.clock.set(T0 + 4);
        assert_eq!(persister.tick().await, TickOutcome::Idle);

        harness.clock.set(T0 + 5);
        assert!(matches!(persister.tick().await, TickOutcome::Persisted(_)));

        let names: Vec<i64> = store.written().iter().map(|n| n.epoch_seconds()).collect();
        assert_eq!(names, vec![T0, T0 + 5]);
        assert_eq!(harness.frames.stats().outstanding, 0);
    }

    #[tokio::test]
    async fn test_clock_stepping_back_captures_at_once() {
        let harness = Harness::new(2);
        let store = Arc::new(ScriptedStore::new());
        let mut persister = harness.persister(store.clone());

        assert!(matches!(persister.tick().await, TickOutcome::Persisted(_)));

        // An hour behind the last capture
        harness.clock.set(T0 - 3600);
        assert!(matches!(persister.tick().await, TickOutcome::Persisted(_)));

        // Cadence resumes from the new time
        harness.clock.set(T0 - 3598);
        assert_eq!(persister.tick().await, TickOutcome::Idle);
        harness.clock.set(T0 - 3595);
        assert!(matches!(persister.tick().await, TickOutcome::Persisted(_)));

        let names: Vec<i64> = store.written().iter().map(|n| n.epoch_seconds()).collect();
        assert_eq!(names, vec![T0, T0 - 3600, T0 - 3595]);
    }

    #[tokio::test]
    async fn test_eleven_write_failures_restart_once() {
        let harness = Harness::new(0);
        let mount = tempfile::tempdir().unwrap();
        // The frame directory is never created, so every open fails
        let store = Arc::new(DirectoryStore::new(mount.path(), "timelapse"));
        let mut persister = harness.persister(store);

        for i in 1..=10u32 {
            let outcome = persister.tick().await;
            assert_eq!(
                outcome,
                TickOutcome::WriteFailed {
                    consecutive: i,
                    escalated: None
                }
            );
            harness.clock.advance(5);
        }
        assert_eq!(harness.device.restart_count(), 0);

        let outcome = persister.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::WriteFailed {
                consecutive: 11,
                escalated: Some(RecoveryAction::Restart)
            }
        );
        assert_eq!(harness.device.restart_count(), 1);

        assert!(!mount.path().join("timelapse").exists());
        let stats = harness.frames.stats();
        assert_eq!(stats.acquired, 11);
        assert_eq!(stats.released, 11);
        assert_eq!(stats.outstanding, 0);
    }

    #[tokio::test]
    async fn test_successful_write_clears_failure_count() {
        let harness = Harness::new(2);
        let store = Arc::new(ScriptedStore::new());
        store.fail_next(3);
        let mut persister = harness.persister(store.clone());

        for expected in 1..=3 {
            assert!(matches!(
                persister.tick().await,
                TickOutcome::WriteFailed { consecutive, .. } if consecutive == expected
            ));
            harness.clock.advance(5);
        }

        assert!(matches!(persister.tick().await, TickOutcome::Persisted(_)));
        assert_eq!(persister.write_failures(), 0);

        store.fail_next(1);
        harness.clock.advance(5);
        assert!(matches!(
            persister.tick().await,
            TickOutcome::WriteFailed { consecutive: 1, .. }
        ));

        let stats = persister.stats_handle().lock().clone();
        assert_eq!(stats.frames_written, 1);
        assert_eq!(stats.write_failures, 4);
        assert_eq!(stats.consecutive_write_failures, 1);
    }

    #[tokio::test]
    async fn test_persistent_write_failure_resets_storage_first() {
        let harness = Harness::new(1);
        let store = Arc::new(ScriptedStore::failing());
        let mount = tempfile::tempdir().unwrap();
        harness.supervisor.register(
            Subsystem::Storage,
            Arc::new(DirectoryStore::new(mount.path(), "timelapse").require_mount(false)),
        );
        let mut persister = harness.persister(store);

        let mut escalations = Vec::new();
        for _ in 0..22 {
            if let TickOutcome::WriteFailed {
                escalated: Some(action),
                ..
            } = persister.tick().await
            {
                escalations.push(action);
            }
            harness.clock.advance(5);
        }

        assert_eq!(
            escalations,
            vec![
                RecoveryAction::LocalReset(Subsystem::Storage),
                RecoveryAction::Restart
            ]
        );
        assert_eq!(harness.device.restart_count(), 1);
    }

    #[tokio::test]
    async fn test_persistent_capture_failure_escalates() {
        let harness = Harness::new(1);
        harness
            .supervisor
            .register(Subsystem::Camera, harness.frames.clone());
        harness.camera.fail_next(11);
        let store = Arc::new(ScriptedStore::new());
        let mut persister = harness.persister(store.clone());

        let mut last = TickOutcome::Idle;
        for _ in 0..11 {
            last = persister.tick().await;
            harness.clock.advance(5);
        }

        assert_eq!(
            last,
            TickOutcome::CaptureFailed {
                consecutive: 11,
                escalated: Some(RecoveryAction::LocalReset(Subsystem::Camera))
            }
        );
        assert_eq!(harness.camera.reinit_count(), 1);
        assert_eq!(harness.device.restart_count(), 0);

        // Camera works again, budget restored
        assert!(matches!(persister.tick().await, TickOutcome::Persisted(_)));
        assert_eq!(harness.supervisor.reset_count(Subsystem::Camera), 0);
        assert_eq!(harness.frames.stats().outstanding, 0);
        assert_eq!(store.written().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let harness = Harness::new(2);
        let store = Arc::new(ScriptedStore::new());
        let persister = harness.persister(store.clone());
        let stats = persister.stats_handle();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(persister.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        harness.clock.advance(5);
        tokio::time::sleep(Duration::from_secs(1)).await;

        cancel.cancel();
        task.await.unwrap();

        assert_eq!(store.written().len(), 2);
        assert_eq!(stats.lock().frames_written, 2);
        assert_eq!(harness.frames.stats().outstanding, 0);
    }
}
