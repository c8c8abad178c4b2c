use crate::config::{AccessPointConfig, NetworkConfig, RadioBackend, WifiCredentials};
use crate::error::NetworkError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

/// Connection profile used for the local access point
const AP_CONNECTION_NAME: &str = "lapsecam-ap";

/// Wireless radio able to join a network and host an access point
#[async_trait]
pub trait Radio: Send + Sync {
    fn name(&self) -> &'static str;

    /// Try to join one network. Returns once associated or failed.
    async fn associate(&self, network: &WifiCredentials) -> Result<(), NetworkError>;

    async fn configure_access_point(&self, ap: &AccessPointConfig) -> Result<(), NetworkError>;

    /// Power-cycle the radio
    async fn reset(&self) -> Result<(), NetworkError>;
}

/// Create the radio selected by `config.backend`.
///
/// `none` means connectivity is managed outside lapsecam and there is no radio to drive.
pub fn build_radio(config: &NetworkConfig) -> Option<Arc<dyn Radio>> {
    match config.backend {
        RadioBackend::None => None,
        RadioBackend::Nmcli => Some(Arc::new(NmcliRadio::new(
            config.interface.clone(),
            config.ap_interface.clone(),
        ))),
    }
}

/// NetworkManager radio driven through `nmcli`
pub struct NmcliRadio {
    interface: String,
    ap_interface: String,
}

impl NmcliRadio {
    pub fn new(interface: String, ap_interface: String) -> Self {
        Self {
            interface,
            ap_interface,
        }
    }

    /// Run one nmcli command. Only the leading words are logged, arguments may hold secrets.
    async fn nmcli(&self, args: &[&str]) -> Result<String, NetworkError> {
        debug!("nmcli {}", args.iter().take(3).copied().collect::<Vec<_>>().join(" "));

        let output = Command::new("nmcli")
            .args(args)
            .output()
            .await
            .map_err(|e| NetworkError::Command {
                details: format!("failed to run nmcli: {}", e),
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(NetworkError::Command {
                details: format!(
                    "nmcli exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })
        }
    }
}

#[async_trait]
impl Radio for NmcliRadio {
    fn name(&self) -> &'static str {
        "nmcli"
    }

    async fn associate(&self, network: &WifiCredentials) -> Result<(), NetworkError> {
        let mut args = vec!["--wait", "10", "device", "wifi", "connect", network.ssid.as_str()];
        if !network.password.is_empty() {
            args.extend(["password", network.password.as_str()]);
        }
        args.extend(["ifname", self.interface.as_str()]);

        self.nmcli(&args)
            .await
            .map(|_| ())
            .map_err(|e| NetworkError::Association {
                ssid: network.ssid.clone(),
                details: e.to_string(),
            })
    }

    async fn configure_access_point(&self, ap: &AccessPointConfig) -> Result<(), NetworkError> {
        let to_ap_error = |e: NetworkError| NetworkError::AccessPoint {
            details: e.to_string(),
        };

        // A stale profile from an earlier run is replaced
        let _ = self.nmcli(&["connection", "delete", AP_CONNECTION_NAME]).await;

        let address = format!("{}/{}", ap.address, ap.prefix_len());
        let channel = ap.channel.to_string();
        let mut args = vec![
            "connection",
            "add",
            "type",
            "wifi",
            "ifname",
            self.ap_interface.as_str(),
            "con-name",
            AP_CONNECTION_NAME,
            "autoconnect",
            "no",
            "ssid",
            ap.ssid.as_str(),
            "mode",
            "ap",
            "802-11-wireless.band",
            "bg",
            "802-11-wireless.channel",
            channel.as_str(),
            "ipv4.method",
            "shared",
            "ipv4.addresses",
            address.as_str(),
        ];
        if !ap.password.is_empty() {
            args.extend(["wifi-sec.key-mgmt", "wpa-psk", "wifi-sec.psk", ap.password.as_str()]);
        }

        self.nmcli(&args).await.map_err(to_ap_error)?;
        self.nmcli(&["connection", "up", AP_CONNECTION_NAME])
            .await
            .map_err(to_ap_error)?;

        info!(
            "Access point {} up on {} at {}",
            ap.ssid, self.ap_interface, address
        );
        Ok(())
    }

    async fn reset(&self) -> Result<(), NetworkError> {
        info!("Power-cycling wireless radio");
        self.nmcli(&["radio", "wifi", "off"]).await?;
        self.nmcli(&["radio", "wifi", "on"]).await?;
        Ok(())
    }
}
