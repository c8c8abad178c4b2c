use super::*;
use crate::config::{CameraBackend, LapsecamConfig, RadioBackend, WifiCredentials};
use crate::recovery::Subsystem;
use crate::testing::{RecordingDevice, ScriptedRadio};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

fn create_test_config(storage: &Path, ntp_port: u16) -> LapsecamConfig {
    let mut config = LapsecamConfig::default();
    config.camera.backend = CameraBackend::Pattern;
    config.camera.resolution = (320, 240);
    config.camera.fps = 30;
    config.clock.server = "127.0.0.1".to_string();
    config.clock.port = ntp_port;
    config.clock.timeout_ms = 50;
    config.stream.ip = "127.0.0.1".to_string();
    config.stream.port = 0;
    config.timelapse.path = storage.display().to_string();
    config.timelapse.require_mount = false;
    config.timelapse.poll_interval_ms = 20;
    config
}

fn with_radio(mut config: LapsecamConfig) -> LapsecamConfig {
    config.network.backend = RadioBackend::Nmcli;
    config.network.candidates = vec![WifiCredentials {
        ssid: "HOME".to_string(),
        password: "secret".to_string(),
    }];
    config
}

#[tokio::test]
async fn test_orchestrator_lifecycle() {
    let storage = tempfile::tempdir().unwrap();
    let silent_ntp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let config = create_test_config(storage.path(), silent_ntp.local_addr().unwrap().port());
    let device = Arc::new(RecordingDevice::default());

    let mut orchestrator = LapsecamOrchestrator::with_device(config, device.clone());
    orchestrator.initialize().await.unwrap();

    for component in ["network", "clock", "storage", "camera"] {
        assert_eq!(
            orchestrator.get_component_state(component).await,
            Some(ComponentState::Running),
            "{}",
            component
        );
    }
    assert!(!orchestrator.clock().is_synchronized());

    orchestrator.start().await.unwrap();
    let stats = orchestrator.persister_stats().unwrap();

    for _ in 0..200 {
        if stats.lock().frames_written > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let last_file = stats.lock().last_file.clone().expect("a frame was written");
    assert!(storage.path().join("timelapse").join(&last_file).exists());

    let exit_code = orchestrator.shutdown().await.unwrap();
    assert_eq!(exit_code, 0);

    let states = orchestrator.get_all_component_states().await;
    assert!(states.values().all(|state| *state == ComponentState::Stopped));
    assert_eq!(orchestrator.frame_source().unwrap().stats().outstanding, 0);
    assert_eq!(device.restart_count(), 0);
}

#[tokio::test]
async fn test_start_requires_initialize() {
    let storage = tempfile::tempdir().unwrap();
    let config = create_test_config(storage.path(), 9);
    let mut orchestrator =
        LapsecamOrchestrator::with_device(config, Arc::new(RecordingDevice::default()));

    assert!(orchestrator.start().await.is_err());
}

#[cfg(not(all(feature = "camera", target_os = "linux")))]
#[tokio::test]
async fn test_camera_init_failure_requests_restart() {
    let storage = tempfile::tempdir().unwrap();
    let silent_ntp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut config = create_test_config(storage.path(), silent_ntp.local_addr().unwrap().port());
    config.camera.backend = CameraBackend::Gstreamer;
    let device = Arc::new(RecordingDevice::default());

    let mut orchestrator = LapsecamOrchestrator::with_device(config, device.clone());
    assert!(orchestrator.initialize().await.is_err());

    assert_eq!(device.restart_count(), 1);
    assert_eq!(
        orchestrator.get_component_state("camera").await,
        Some(ComponentState::Failed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_network_resets_radio_then_restarts() {
    let storage = tempfile::tempdir().unwrap();
    let mut config = with_radio(create_test_config(storage.path(), 9));
    config.system.local_reset_attempts = 1;
    let device = Arc::new(RecordingDevice::default());
    let radio = Arc::new(ScriptedRadio::new());

    let mut orchestrator = LapsecamOrchestrator::with_device(config, device.clone());
    orchestrator.set_radio(radio.clone());

    assert!(orchestrator.bootstrap_connectivity().await.is_err());

    assert_eq!(radio.reset_count(), 1);
    assert_eq!(radio.calls().len(), 22);
    assert_eq!(device.restart_count(), 1);
    assert!(device.reasons()[0].contains("11 attempts"));
    assert_eq!(
        orchestrator.get_component_state("network").await,
        Some(ComponentState::Failed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_network_recovers_after_radio_reset() {
    let storage = tempfile::tempdir().unwrap();
    let config = with_radio(create_test_config(storage.path(), 9));
    let device = Arc::new(RecordingDevice::default());
    let radio = Arc::new(ScriptedRadio::new());
    radio.reachable_after("HOME", 12);

    let mut orchestrator = LapsecamOrchestrator::with_device(config, device.clone());
    orchestrator.set_radio(radio.clone());

    orchestrator.bootstrap_connectivity().await.unwrap();

    assert_eq!(radio.reset_count(), 1);
    assert_eq!(radio.access_point_count(), 1);
    assert_eq!(orchestrator.supervisor().reset_count(Subsystem::Network), 0);
    assert_eq!(device.restart_count(), 0);
    assert_eq!(
        orchestrator.get_component_state("network").await,
        Some(ComponentState::Running)
    );
}
