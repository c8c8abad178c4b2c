use super::Radio;
use crate::config::{AccessPointConfig, NetworkConfig, WifiCredentials};
use crate::error::{NetworkError, Result};
use crate::recovery::SubsystemReset;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Network joined by a successful bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub ssid: String,
    /// Passes over the candidate list, including the successful one
    pub attempts: u32,
}

/// Joins the first reachable candidate network, then brings up the local
/// access point.
///
/// One attempt is a pass over every candidate in order. After the initial
/// attempt up to `max_retries` more follow, each after `retry_interval`.
pub struct ConnectivityBootstrap {
    radio: Arc<dyn Radio>,
    candidates: Vec<WifiCredentials>,
    access_point: AccessPointConfig,
    retry_interval: Duration,
    max_retries: u32,
}

impl ConnectivityBootstrap {
    pub fn new(
        radio: Arc<dyn Radio>,
        candidates: Vec<WifiCredentials>,
        access_point: AccessPointConfig,
        retry_interval: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            radio,
            candidates,
            access_point,
            retry_interval,
            max_retries,
        }
    }

    pub fn from_config(radio: Arc<dyn Radio>, config: &NetworkConfig) -> Self {
        Self::new(
            radio,
            config.candidates.clone(),
            config.access_point.clone(),
            config.retry_interval(),
            config.max_retries,
        )
    }

    /// Associate, then configure the access point.
    ///
    /// Fails with [`NetworkError::Exhausted`] once every attempt failed and
    /// with [`NetworkError::AccessPoint`] when the access point cannot be set up.
    pub async fn run(&self) -> Result<Association, NetworkError> {
        info!(
            "Connecting to one of {} candidate networks via {}",
            self.candidates.len(),
            self.radio.name()
        );

        let mut attempts = 0u32;
        let ssid = loop {
            attempts += 1;
            if let Some(ssid) = self.attempt().await {
                break ssid;
            }

            if attempts > self.max_retries {
                warn!("No candidate network reachable after {} attempts", attempts);
                return Err(NetworkError::Exhausted { attempts });
            }

            debug!(
                "Attempt {} failed, retrying in {:?}",
                attempts, self.retry_interval
            );
            sleep(self.retry_interval).await;
        };

        info!("Connected to {} after {} attempts", ssid, attempts);

        self.radio
            .configure_access_point(&self.access_point)
            .await
            .map_err(|e| match e {
                NetworkError::AccessPoint { .. } => e,
                other => NetworkError::AccessPoint {
                    details: other.to_string(),
                },
            })?;

        info!(
            "Access point {} configured at {}",
            self.access_point.ssid, self.access_point.address
        );
        Ok(Association { ssid, attempts })
    }

    /// One pass over the candidates; the first that associates wins
    async fn attempt(&self) -> Option<String> {
        for candidate in &self.candidates {
            match self.radio.associate(candidate).await {
                Ok(()) => return Some(candidate.ssid.clone()),
                Err(e) => debug!("{}", e),
            }
        }
        None
    }
}

#[async_trait]
impl SubsystemReset for ConnectivityBootstrap {
    async fn reset(&self) -> Result<()> {
        self.radio.reset().await?;
        Ok(())
    }
}
