use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LapsecamConfig {
    pub camera: CameraConfig,
    pub network: NetworkConfig,
    pub clock: ClockConfig,
    pub stream: StreamConfig,
    pub timelapse: TimelapseConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Frame producer backend
    #[serde(default = "default_camera_backend")]
    pub backend: CameraBackend,

    /// Camera device index (e.g., 0 for /dev/video0)
    #[serde(default = "default_camera_index")]
    pub index: u32,

    /// Capture resolution (width, height), fixed for the lifetime of the process
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second requested from the sensor
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// JPEG quality, 0-63 where lower is better
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u32,

    /// Depth of the hardware frame buffer pool
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,

    /// How long an acquire may wait for a free buffer and a frame
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    /// Synthetic JPEG frames, no hardware required
    Pattern,
    /// V4L2 camera through a GStreamer pipeline
    Gstreamer,
}

impl CameraBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraBackend::Pattern => "pattern",
            CameraBackend::Gstreamer => "gstreamer",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NetworkConfig {
    #[serde(default = "default_radio_backend")]
    pub backend: RadioBackend,

    /// Wireless interface used for both station and access point
    #[serde(default = "default_wifi_interface")]
    pub interface: String,

    /// Interface hosting the local access point (a virtual interface on wlan0)
    #[serde(default = "default_ap_interface")]
    pub ap_interface: String,

    /// Candidate networks, tried in listed order
    #[serde(default)]
    pub candidates: Vec<WifiCredentials>,

    /// Delay between association attempts
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Retries after the initial attempt before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_access_point")]
    pub access_point: AccessPointConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RadioBackend {
    /// Connectivity is managed outside this process
    None,
    /// NetworkManager through the nmcli command line tool
    Nmcli,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct AccessPointConfig {
    pub ssid: String,
    pub password: String,
    pub address: String,
    pub netmask: String,
    pub channel: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClockConfig {
    /// SNTP server host name
    #[serde(default = "default_ntp_server")]
    pub server: String,

    #[serde(default = "default_ntp_port")]
    pub port: u16,

    /// Fixed offset from UTC used for local time display
    #[serde(default = "default_utc_offset_seconds")]
    pub utc_offset_seconds: i32,

    #[serde(default = "default_ntp_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StreamConfig {
    /// IP address to bind to
    #[serde(default = "default_stream_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_stream_port")]
    pub port: u16,

    /// Concurrent HTTP clients holding frames: live streams and snapshots together
    #[serde(default = "default_max_frame_clients")]
    pub max_frame_clients: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TimelapseConfig {
    /// Mount point of the storage medium
    #[serde(default = "default_timelapse_path")]
    pub path: String,

    /// Directory under the mount point receiving the frames
    #[serde(default = "default_timelapse_directory")]
    pub directory: String,

    /// Refuse to write unless `path` is a separate mounted filesystem
    #[serde(default = "default_require_mount")]
    pub require_mount: bool,

    /// A capture happens once more than this many seconds have elapsed
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    /// Delay after every persister iteration
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consecutive write failures tolerated before escalation
    #[serde(default = "default_max_write_failures")]
    pub max_write_failures: u32,

    /// Consecutive camera faults tolerated before escalation
    #[serde(default = "default_max_capture_failures")]
    pub max_capture_failures: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    #[serde(default = "default_restart_mode")]
    pub restart_mode: RestartMode,

    /// Command executed for a device restart in `reboot` mode
    #[serde(default = "default_restart_command")]
    pub restart_command: Vec<String>,

    /// Local subsystem resets attempted before a full restart
    #[serde(default = "default_local_reset_attempts")]
    pub local_reset_attempts: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RestartMode {
    /// Reboot the whole device
    Reboot,
    /// Exit the process and let the service manager start it again
    Exit,
}

impl LapsecamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("lapsecam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let ap = default_access_point();

        let settings = Config::builder()
            .set_default("camera.backend", default_camera_backend().as_str())?
            .set_default("camera.index", default_camera_index())?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.jpeg_quality", default_jpeg_quality())?
            .set_default("camera.buffer_count", default_buffer_count() as i64)?
            .set_default("camera.acquire_timeout_ms", default_acquire_timeout_ms())?
            .set_default("network.backend", "none")?
            .set_default("network.interface", default_wifi_interface())?
            .set_default("network.ap_interface", default_ap_interface())?
            .set_default("network.retry_interval_ms", default_retry_interval_ms())?
            .set_default("network.max_retries", default_max_retries())?
            .set_default("network.access_point.ssid", ap.ssid)?
            .set_default("network.access_point.password", ap.password)?
            .set_default("network.access_point.address", ap.address)?
            .set_default("network.access_point.netmask", ap.netmask)?
            .set_default("network.access_point.channel", ap.channel as i64)?
            .set_default("clock.server", default_ntp_server())?
            .set_default("clock.port", default_ntp_port())?
            .set_default("clock.utc_offset_seconds", default_utc_offset_seconds())?
            .set_default("clock.timeout_ms", default_ntp_timeout_ms())?
            .set_default("stream.ip", default_stream_ip())?
            .set_default("stream.port", default_stream_port())?
            .set_default(
                "stream.max_frame_clients",
                default_max_frame_clients() as i64,
            )?
            .set_default("timelapse.path", default_timelapse_path())?
            .set_default("timelapse.directory", default_timelapse_directory())?
            .set_default("timelapse.require_mount", default_require_mount())?
            .set_default("timelapse.interval_seconds", default_interval_seconds())?
            .set_default("timelapse.poll_interval_ms", default_poll_interval_ms())?
            .set_default("timelapse.max_write_failures", default_max_write_failures())?
            .set_default(
                "timelapse.max_capture_failures",
                default_max_capture_failures(),
            )?
            .set_default("system.restart_mode", "reboot")?
            .set_default("system.restart_command", default_restart_command())?
            .set_default("system.local_reset_attempts", default_local_reset_attempts())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // LAPSECAM_STREAM__PORT=9090 style overrides
            .add_source(
                Environment::with_prefix("LAPSECAM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: LapsecamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.camera.jpeg_quality > 63 {
            return Err(ConfigError::Message(
                "Camera jpeg_quality must be within 0-63".to_string(),
            ));
        }

        if self.camera.buffer_count == 0 {
            return Err(ConfigError::Message(
                "Camera buffer_count must be greater than 0".to_string(),
            ));
        }

        if self.network.backend != RadioBackend::None {
            if self.network.candidates.is_empty() {
                return Err(ConfigError::Message(
                    "At least one network candidate is required".to_string(),
                ));
            }
            if self.network.candidates.iter().any(|c| c.ssid.is_empty()) {
                return Err(ConfigError::Message(
                    "Network candidate ssid must not be empty".to_string(),
                ));
            }
        }

        let ap = &self.network.access_point;
        if ap.address.parse::<Ipv4Addr>().is_err() {
            return Err(ConfigError::Message(format!(
                "Access point address '{}' is not an IPv4 address",
                ap.address
            )));
        }
        if ap.netmask.parse::<Ipv4Addr>().is_err() {
            return Err(ConfigError::Message(format!(
                "Access point netmask '{}' is not an IPv4 netmask",
                ap.netmask
            )));
        }
        if !(1..=14).contains(&ap.channel) {
            return Err(ConfigError::Message(
                "Access point channel must be within 1-14".to_string(),
            ));
        }

        if self.stream.max_frame_clients == 0 {
            return Err(ConfigError::Message(
                "Stream max_frame_clients must be greater than 0".to_string(),
            ));
        }

        // Every frame client may hold a buffer; the timelapse needs one left
        if self.stream.max_frame_clients >= self.camera.buffer_count {
            return Err(ConfigError::Message(format!(
                "Stream max_frame_clients ({}) must be less than camera buffer_count ({})",
                self.stream.max_frame_clients, self.camera.buffer_count
            )));
        }

        if self.timelapse.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Timelapse poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.system.restart_mode == RestartMode::Reboot && self.system.restart_command.is_empty()
        {
            return Err(ConfigError::Message(
                "Restart command must not be empty in reboot mode".to_string(),
            ));
        }

        Ok(())
    }
}

impl CameraConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl NetworkConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl AccessPointConfig {
    /// Prefix length of the configured netmask (255.255.255.0 -> 24)
    pub fn prefix_len(&self) -> u32 {
        self.netmask
            .parse::<Ipv4Addr>()
            .map(|mask| u32::from(mask).count_ones())
            .unwrap_or(24)
    }
}

impl ClockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl TimelapseConfig {
    /// Directory the timelapse frames are written to
    pub fn frame_directory(&self) -> PathBuf {
        Path::new(&self.path).join(&self.directory)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for LapsecamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                backend: default_camera_backend(),
                index: default_camera_index(),
                resolution: default_camera_resolution(),
                fps: default_camera_fps(),
                jpeg_quality: default_jpeg_quality(),
                buffer_count: default_buffer_count(),
                acquire_timeout_ms: default_acquire_timeout_ms(),
            },
            network: NetworkConfig {
                backend: default_radio_backend(),
                interface: default_wifi_interface(),
                ap_interface: default_ap_interface(),
                candidates: Vec::new(),
                retry_interval_ms: default_retry_interval_ms(),
                max_retries: default_max_retries(),
                access_point: default_access_point(),
            },
            clock: ClockConfig {
                server: default_ntp_server(),
                port: default_ntp_port(),
                utc_offset_seconds: default_utc_offset_seconds(),
                timeout_ms: default_ntp_timeout_ms(),
            },
            stream: StreamConfig {
                ip: default_stream_ip(),
                port: default_stream_port(),
                max_frame_clients: default_max_frame_clients(),
            },
            timelapse: TimelapseConfig {
                path: default_timelapse_path(),
                directory: default_timelapse_directory(),
                require_mount: default_require_mount(),
                interval_seconds: default_interval_seconds(),
                poll_interval_ms: default_poll_interval_ms(),
                max_write_failures: default_max_write_failures(),
                max_capture_failures: default_max_capture_failures(),
            },
            system: SystemConfig {
                restart_mode: default_restart_mode(),
                restart_command: default_restart_command(),
                local_reset_attempts: default_local_reset_attempts(),
            },
        }
    }
}

// Default value functions
fn default_camera_backend() -> CameraBackend {
    if cfg!(all(feature = "camera", target_os = "linux")) {
        CameraBackend::Gstreamer
    } else {
        CameraBackend::Pattern
    }
}
fn default_camera_index() -> u32 {
    0
}
fn default_camera_resolution() -> (u32, u32) {
    (1600, 1200)
}
fn default_camera_fps() -> u32 {
    15
}
fn default_jpeg_quality() -> u32 {
    4
}
fn default_buffer_count() -> usize {
    4
}
fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_radio_backend() -> RadioBackend {
    RadioBackend::None
}
fn default_wifi_interface() -> String {
    "wlan0".to_string()
}
fn default_ap_interface() -> String {
    "ap0".to_string()
}
fn default_retry_interval_ms() -> u64 {
    500
}
fn default_max_retries() -> u32 {
    10
}
fn default_access_point() -> AccessPointConfig {
    AccessPointConfig {
        ssid: "LAPSECAM".to_string(),
        password: "12345679".to_string(),
        address: "192.168.1.1".to_string(),
        netmask: "255.255.255.0".to_string(),
        channel: 1,
    }
}

fn default_ntp_server() -> String {
    "ntp5.aliyun.com".to_string()
}
fn default_ntp_port() -> u16 {
    123
}
fn default_utc_offset_seconds() -> i32 {
    8 * 3600
}
fn default_ntp_timeout_ms() -> u64 {
    3_000
}

fn default_stream_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_stream_port() -> u16 {
    8080
}
fn default_max_frame_clients() -> usize {
    3
}

fn default_timelapse_path() -> String {
    "/mnt/sdcard".to_string()
}
fn default_timelapse_directory() -> String {
    "timelapse".to_string()
}
fn default_require_mount() -> bool {
    true
}
fn default_interval_seconds() -> u64 {
    4
}
fn default_poll_interval_ms() -> u64 {
    200
}
fn default_max_write_failures() -> u32 {
    10
}
fn default_max_capture_failures() -> u32 {
    10
}

fn default_restart_mode() -> RestartMode {
    RestartMode::Reboot
}
fn default_restart_command() -> Vec<String> {
    vec!["systemctl".to_string(), "reboot".to_string()]
}
fn default_local_reset_attempts() -> u32 {
    2
}
