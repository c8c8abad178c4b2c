use crate::config::{RestartMode, SystemConfig};
use crate::error::{LapsecamError, NetworkError, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Exit status asking the service manager to start the process again
pub const RESTART_EXIT_CODE: i32 = 75;

/// Hardware area a fault belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Subsystem {
    Network,
    Storage,
    Camera,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subsystem::Network => write!(f, "network"),
            Subsystem::Storage => write!(f, "storage"),
            Subsystem::Camera => write!(f, "camera"),
        }
    }
}

/// Unrecoverable condition reported to the supervisor
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    ConnectivityExhausted { attempts: u32 },
    AccessPointFailed { details: String },
    PersistentWriteFailure { consecutive: u32 },
    PersistentCaptureFailure { consecutive: u32 },
    CameraInitFailed { details: String },
}

impl Fault {
    pub fn subsystem(&self) -> Subsystem {
        match self {
            Fault::ConnectivityExhausted { .. } | Fault::AccessPointFailed { .. } => {
                Subsystem::Network
            }
            Fault::PersistentWriteFailure { .. } => Subsystem::Storage,
            Fault::PersistentCaptureFailure { .. } | Fault::CameraInitFailed { .. } => {
                Subsystem::Camera
            }
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::ConnectivityExhausted { attempts } => {
                write!(f, "no network reachable after {} attempts", attempts)
            }
            Fault::AccessPointFailed { details } => {
                write!(f, "access point configuration failed: {}", details)
            }
            Fault::PersistentWriteFailure { consecutive } => {
                write!(f, "{} consecutive frame writes failed", consecutive)
            }
            Fault::PersistentCaptureFailure { consecutive } => {
                write!(f, "{} consecutive captures failed", consecutive)
            }
            Fault::CameraInitFailed { details } => {
                write!(f, "camera initialization failed: {}", details)
            }
        }
    }
}

impl From<&NetworkError> for Fault {
    fn from(error: &NetworkError) -> Self {
        match error {
            NetworkError::Exhausted { attempts } => Fault::ConnectivityExhausted {
                attempts: *attempts,
            },
            other => Fault::AccessPointFailed {
                details: other.to_string(),
            },
        }
    }
}

/// What the supervisor did about a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// The subsystem was reset in place
    LocalReset(Subsystem),
    /// A device restart was requested
    Restart,
}

/// Something the supervisor can reset without restarting the device
#[async_trait]
pub trait SubsystemReset: Send + Sync {
    async fn reset(&self) -> Result<()>;
}

/// Last-resort control over the device itself
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Restart the device. Production backends do not return.
    async fn restart(&self, reason: &str);
}

/// Restart through the operating system.
///
/// `reboot` runs the configured command and then exits; `exit` leaves the
/// process with [`RESTART_EXIT_CODE`] so the service manager brings it back.
pub struct SystemRestart {
    mode: RestartMode,
    command: Vec<String>,
}

impl SystemRestart {
    pub fn new(mode: RestartMode, command: Vec<String>) -> Self {
        Self { mode, command }
    }

    pub fn from_config(config: &SystemConfig) -> Self {
        Self::new(config.restart_mode, config.restart_command.clone())
    }

    async fn run_restart_command(&self) -> Result<()> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| LapsecamError::system("restart command is empty"))?;

        let status = tokio::process::Command::new(program)
            .args(args)
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(LapsecamError::system(format!(
                "restart command exited with {}",
                status
            )))
        }
    }
}

#[async_trait]
impl DeviceControl for SystemRestart {
    async fn restart(&self, reason: &str) {
        error!("Restarting device: {}", reason);

        if self.mode == RestartMode::Reboot {
            if let Err(e) = self.run_restart_command().await {
                error!("Reboot command failed, exiting instead: {}", e);
            }
        }

        std::process::exit(RESTART_EXIT_CODE);
    }
}

/// Escalation ladder shared by every component.
///
/// A fault first gets up to `max_local_resets` resets of its own subsystem.
/// Once that budget is spent, or no resetter is registered, the device is
/// restarted. A subsystem that works again calls [`Supervisor::mark_recovered`]
/// to restore its budget.
pub struct Supervisor {
    device: Arc<dyn DeviceControl>,
    max_local_resets: u32,
    resetters: RwLock<HashMap<Subsystem, Arc<dyn SubsystemReset>>>,
    reset_counts: Mutex<HashMap<Subsystem, u32>>,
    restarts: AtomicU64,
}

impl Supervisor {
    pub fn new(device: Arc<dyn DeviceControl>, max_local_resets: u32) -> Self {
        Self {
            device,
            max_local_resets,
            resetters: RwLock::new(HashMap::new()),
            reset_counts: Mutex::new(HashMap::new()),
            restarts: AtomicU64::new(0),
        }
    }

    pub fn register(&self, subsystem: Subsystem, resetter: Arc<dyn SubsystemReset>) {
        self.resetters.write().insert(subsystem, resetter);
    }

    /// Pick the next rung of the ladder and consume budget for it
    pub fn decide(&self, fault: &Fault) -> RecoveryAction {
        let subsystem = fault.subsystem();
        if !self.resetters.read().contains_key(&subsystem) {
            return RecoveryAction::Restart;
        }

        let mut counts = self.reset_counts.lock();
        let used = counts.entry(subsystem).or_insert(0);
        if *used >= self.max_local_resets {
            return RecoveryAction::Restart;
        }

        *used += 1;
        info!(
            "Scheduling {} reset (attempt {}/{}): {}",
            subsystem, used, self.max_local_resets, fault
        );
        RecoveryAction::LocalReset(subsystem)
    }

    /// Act on a fault. A failing local reset escalates straight to a restart.
    pub async fn handle(&self, fault: Fault) -> RecoveryAction {
        error!("Unrecoverable {} fault: {}", fault.subsystem(), fault);

        if let RecoveryAction::LocalReset(subsystem) = self.decide(&fault) {
            let resetter = self.resetters.read().get(&subsystem).cloned();
            if let Some(resetter) = resetter {
                match resetter.reset().await {
                    Ok(()) => {
                        info!("{} reset completed", subsystem);
                        return RecoveryAction::LocalReset(subsystem);
                    }
                    Err(e) => warn!("{} reset failed: {}", subsystem, e),
                }
            }
        }

        self.restarts.fetch_add(1, Ordering::AcqRel);
        self.device.restart(&fault.to_string()).await;
        RecoveryAction::Restart
    }

    /// Restore the local reset budget of a subsystem that works again
    pub fn mark_recovered(&self, subsystem: Subsystem) {
        if self.reset_counts.lock().remove(&subsystem).is_some() {
            info!("{} recovered, reset budget restored", subsystem);
        }
    }

    pub fn reset_count(&self, subsystem: Subsystem) -> u32 {
        self.reset_counts.lock().get(&subsystem).copied().unwrap_or(0)
    }

    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingReset, RecordingDevice};

    fn supervisor(max_local_resets: u32) -> (Supervisor, Arc<RecordingDevice>) {
        let device = Arc::new(RecordingDevice::default());
        (Supervisor::new(device.clone(), max_local_resets), device)
    }

    fn write_fault() -> Fault {
        Fault::PersistentWriteFailure { consecutive: 11 }
    }

    #[test]
    fn test_fault_subsystems() {
        assert_eq!(
            Fault::ConnectivityExhausted { attempts: 11 }.subsystem(),
            Subsystem::Network
        );
        assert_eq!(write_fault().subsystem(), Subsystem::Storage);
        assert_eq!(
            Fault::CameraInitFailed {
                details: "no sensor".into()
            }
            .subsystem(),
            Subsystem::Camera
        );
        assert_eq!(
            Fault::from(&NetworkError::Exhausted { attempts: 11 }),
            Fault::ConnectivityExhausted { attempts: 11 }
        );
    }

    #[tokio::test]
    async fn test_local_resets_then_restart() {
        let (supervisor, device) = supervisor(2);
        let reset = Arc::new(CountingReset::default());
        supervisor.register(Subsystem::Storage, reset.clone());

        assert_eq!(
            supervisor.handle(write_fault()).await,
            RecoveryAction::LocalReset(Subsystem::Storage)
        );
        assert_eq!(
            supervisor.handle(write_fault()).await,
            RecoveryAction::LocalReset(Subsystem::Storage)
        );
        assert_eq!(supervisor.handle(write_fault()).await, RecoveryAction::Restart);

        assert_eq!(reset.count(), 2);
        assert_eq!(device.restart_count(), 1);
        assert_eq!(supervisor.restart_count(), 1);
    }

    #[tokio::test]
    async fn test_recovery_restores_budget() {
        let (supervisor, device) = supervisor(1);
        supervisor.register(Subsystem::Camera, Arc::new(CountingReset::default()));
        let fault = Fault::PersistentCaptureFailure { consecutive: 11 };

        assert!(matches!(
            supervisor.handle(fault.clone()).await,
            RecoveryAction::LocalReset(_)
        ));
        assert_eq!(supervisor.reset_count(Subsystem::Camera), 1);

        supervisor.mark_recovered(Subsystem::Camera);
        assert_eq!(supervisor.reset_count(Subsystem::Camera), 0);

        assert!(matches!(
            supervisor.handle(fault).await,
            RecoveryAction::LocalReset(_)
        ));
        assert_eq!(device.restart_count(), 0);
    }

    #[tokio::test]
    async fn test_unregistered_subsystem_restarts() {
        let (supervisor, device) = supervisor(3);

        let action = supervisor
            .handle(Fault::CameraInitFailed {
                details: "sensor missing".into(),
            })
            .await;

        assert_eq!(action, RecoveryAction::Restart);
        let reasons = device.reasons();
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("sensor missing"));
    }

    #[tokio::test]
    async fn test_failed_reset_escalates() {
        let (supervisor, device) = supervisor(2);
        supervisor.register(Subsystem::Network, Arc::new(CountingReset::failing()));

        let action = supervisor
            .handle(Fault::ConnectivityExhausted { attempts: 11 })
            .await;

        assert_eq!(action, RecoveryAction::Restart);
        assert_eq!(device.restart_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_budget_restarts_immediately() {
        let (supervisor, device) = supervisor(0);
        let reset = Arc::new(CountingReset::default());
        supervisor.register(Subsystem::Storage, reset.clone());

        assert_eq!(supervisor.decide(&write_fault()), RecoveryAction::Restart);
        assert_eq!(supervisor.handle(write_fault()).await, RecoveryAction::Restart);
        assert_eq!(reset.count(), 0);
        assert_eq!(device.restart_count(), 1);
    }
}
