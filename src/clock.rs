use crate::config::ClockConfig;
use crate::error::ClockError;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Offset, Utc};
use rsntp::{AsyncSntpClient, SynchronizationError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const SOCKET_GRACE: Duration = Duration::from_secs(1);

/// Source of wall-clock time for timestamps and filenames
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn epoch_seconds(&self) -> i64 {
        self.now().timestamp()
    }
}

/// Device clock corrected by the offset learned from the last time sync.
///
/// Until a sync succeeds the offset is zero and the device's own clock is used.
pub struct SyncedClock {
    offset_ms: AtomicI64,
    synchronized: AtomicBool,
    local_offset: FixedOffset,
}

impl SyncedClock {
    pub fn new(utc_offset_seconds: i32) -> Self {
        let local_offset = FixedOffset::east_opt(utc_offset_seconds).unwrap_or_else(|| {
            warn!("UTC offset {}s out of range, using UTC", utc_offset_seconds);
            Utc.fix()
        });

        Self {
            offset_ms: AtomicI64::new(0),
            synchronized: AtomicBool::new(false),
            local_offset,
        }
    }

    pub fn apply_offset(&self, offset: ChronoDuration) {
        self.offset_ms
            .store(offset.num_milliseconds(), Ordering::Release);
        self.synchronized.store(true, Ordering::Release);
    }

    pub fn offset(&self) -> ChronoDuration {
        ChronoDuration::milliseconds(self.offset_ms.load(Ordering::Acquire))
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized.load(Ordering::Acquire)
    }

    /// Current time in the configured local offset
    pub fn local_now(&self) -> DateTime<FixedOffset> {
        self.now().with_timezone(&self.local_offset)
    }
}

impl Default for SyncedClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Clock for SyncedClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.offset()
    }
}

/// Result of one successful time request
#[derive(Debug, Clone, Copy)]
pub struct ClockSample {
    pub server_time: DateTime<Utc>,
    pub offset: ChronoDuration,
    pub round_trip: Duration,
}

/// Fire-once SNTP client
pub struct ClockSynchronizer {
    server: String,
    port: u16,
    timeout: Duration,
}

impl ClockSynchronizer {
    pub fn new(server: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            server: server.into(),
            port,
            timeout,
        }
    }

    pub fn from_config(config: &ClockConfig) -> Self {
        Self::new(config.server.clone(), config.port, config.timeout())
    }

    /// Query the server once and apply the offset. Failure leaves the clock as is.
    pub async fn synchronize(&self, clock: &SyncedClock) -> Option<ClockSample> {
        match self.query().await {
            Ok(sample) => {
                clock.apply_offset(sample.offset);
                info!(
                    "Clock synchronized with {} (offset {} ms, round trip {:?})",
                    self.server,
                    sample.offset.num_milliseconds(),
                    sample.round_trip
                );
                info!("Local time: {}", clock.local_now().format("%A, %B %d %Y %H:%M:%S"));
                Some(sample)
            }
            Err(e) => {
                warn!("Failed to obtain time, continuing with device clock: {}", e);
                None
            }
        }
    }

    /// Send one SNTP request and read back the clock offset
    pub async fn query(&self) -> Result<ClockSample, ClockError> {
        let addr = self.resolve().await?;

        let mut client = AsyncSntpClient::new();
        // Bounded by the outer timeout; this only closes the socket
        client.set_timeout(self.timeout + SOCKET_GRACE);

        let started = tokio::time::Instant::now();
        let result = timeout(self.timeout, client.synchronize(addr))
            .await
            .map_err(|_| ClockError::Timeout {
                server: self.server.clone(),
                timeout: self.timeout,
            })?
            .map_err(|e| match e {
                SynchronizationError::IOError(source) => ClockError::Io {
                    server: self.server.clone(),
                    source,
                },
                other => ClockError::InvalidResponse {
                    details: other.to_string(),
                },
            })?;
        let round_trip = started.elapsed();

        debug!("Time response from {} after {:?}", addr, round_trip);

        let offset = result
            .clock_offset()
            .into_chrono_duration()
            .map_err(|e| ClockError::InvalidResponse {
                details: e.to_string(),
            })?;
        let server_time = result
            .datetime()
            .into_chrono_datetime()
            .map_err(|e| ClockError::InvalidResponse {
                details: e.to_string(),
            })?;

        Ok(ClockSample {
            server_time,
            offset,
            round_trip,
        })
    }

    async fn resolve(&self) -> Result<SocketAddr, ClockError> {
        let resolve_err = |details: String| ClockError::Resolve {
            server: self.server.clone(),
            details,
        };

        let addrs: Vec<SocketAddr> = lookup_host((self.server.as_str(), self.port))
            .await
            .map_err(|e| resolve_err(e.to_string()))?
            .collect();

        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| resolve_err("no addresses".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    /// Seconds between the NTP era (1900) and the Unix epoch
    const NTP_UNIX_OFFSET: i64 = 2_208_988_800;
    const NTP_PACKET_LEN: usize = 48;
    const MODE_CLIENT: u8 = 3;
    const MODE_SERVER: u8 = 4;

    fn to_ntp_timestamp(time: DateTime<Utc>) -> [u8; 8] {
        let seconds = (time.timestamp() + NTP_UNIX_OFFSET) as u32;
        let fraction = ((time.timestamp_subsec_nanos() as u64) << 32) / 1_000_000_000;
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&seconds.to_be_bytes());
        out[4..].copy_from_slice(&(fraction as u32).to_be_bytes());
        out
    }

    /// Answer one request with the given mode, shifting server time by `skew`
    async fn fake_time_server(mode: u8, skew: ChronoDuration) -> (u16, tokio::task::JoinHandle<()>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();

        let task = tokio::spawn(async move {
            let mut buf = [0u8; NTP_PACKET_LEN];
            let (_, peer) = socket.recv_from(&mut buf).await.unwrap();
            assert_eq!(buf[0] & 0x07, MODE_CLIENT);

            let now = Utc::now() + skew;
            let mut reply = [0u8; NTP_PACKET_LEN];
            // LI 0, version 4
            reply[0] = 0x20 | mode;
            reply[1] = 2;
            // Originate echoes the client's transmit timestamp
            reply[24..32].copy_from_slice(&buf[40..48]);
            reply[32..40].copy_from_slice(&to_ntp_timestamp(now));
            reply[40..48].copy_from_slice(&to_ntp_timestamp(now));
            socket.send_to(&reply, peer).await.unwrap();
        });

        (port, task)
    }

    #[tokio::test]
    async fn test_sync_applies_server_offset() {
        let (port, server) = fake_time_server(MODE_SERVER, ChronoDuration::hours(1)).await;
        let sync = ClockSynchronizer::new("127.0.0.1", port, Duration::from_secs(2));
        let clock = SyncedClock::new(8 * 3600);

        let sample = sync.synchronize(&clock).await.expect("sync succeeds");
        server.await.unwrap();

        assert!(clock.is_synchronized());
        let offset = sample.offset.num_seconds();
        assert!((3595..=3605).contains(&offset), "offset {}", offset);

        let ahead = (clock.now() - Utc::now()).num_seconds();
        assert!((3595..=3605).contains(&ahead));
        assert_eq!(clock.local_now().offset().local_minus_utc(), 8 * 3600);
    }

    #[tokio::test]
    async fn test_sync_failure_keeps_device_clock() {
        // Bound but silent server
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();

        let sync = ClockSynchronizer::new("127.0.0.1", port, Duration::from_millis(100));
        let clock = SyncedClock::default();

        assert!(matches!(sync.query().await, Err(ClockError::Timeout { .. })));
        assert!(sync.synchronize(&clock).await.is_none());
        assert!(!clock.is_synchronized());
        assert_eq!(clock.offset(), ChronoDuration::zero());
    }

    #[tokio::test]
    async fn test_client_mode_reply_rejected() {
        let (port, server) = fake_time_server(MODE_CLIENT, ChronoDuration::zero()).await;
        let sync = ClockSynchronizer::new("127.0.0.1", port, Duration::from_secs(2));

        let result = sync.query().await;
        server.await.unwrap();
        assert!(matches!(result, Err(ClockError::InvalidResponse { .. })));
    }
}
