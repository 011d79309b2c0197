//! Runtime configuration consumed by [`DeviceClient::connect`](crate::DeviceClient::connect).

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DeviceSdkError, Result};
use crate::identity::DeviceIdentity;
use crate::router::HandlerRegistration;
use crate::watchdog::PingMissCallback;

/// Time allowed for the answer to the last tolerated ping.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(300);
/// Probe period; must be shorter than the pong wait.
pub const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(270);
/// Deadline for a single frame write.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);
/// Largest inbound message accepted from the peer.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 2048;
/// Consecutive unanswered pings tolerated before the peer is declared dead.
pub const DEFAULT_MAX_MISSED_PINGS: u32 = 3;
/// Transport write buffer size.
pub const DEFAULT_WRITE_BUFFER_BYTES: usize = 65535;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_UPGRADE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_TCP_KEEPALIVE: Duration = Duration::from_secs(300);

/// Keepalive watchdog timing.
///
/// A ping goes out every `ping_period`; each period that ends with the
/// previous ping unanswered is one miss.  Misses are advisory.  The read
/// loop only gives up on the peer after [`liveness_window`] without any
/// inbound frame, which leaves room for `max_missed_pings` misses.
///
/// [`liveness_window`]: KeepaliveConfig::liveness_window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    pub ping_period: Duration,
    /// Time allowed for the answer to the last tolerated ping.
    pub pong_wait: Duration,
    pub write_wait: Duration,
    pub max_missed_pings: u32,
}

impl KeepaliveConfig {
    /// How long the read loop waits for any inbound frame before it tears
    /// the client down.
    pub fn liveness_window(&self) -> Duration {
        self.ping_period
            .saturating_mul(self.max_missed_pings)
            .saturating_add(self.pong_wait)
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_period: DEFAULT_PING_PERIOD,
            pong_wait: DEFAULT_PONG_WAIT,
            write_wait: DEFAULT_WRITE_WAIT,
            max_missed_pings: DEFAULT_MAX_MISSED_PINGS,
        }
    }
}

/// Handshake timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeTimeouts {
    /// TCP + TLS connect for the discovery request.
    pub connect: Duration,
    /// Whole discovery request, body included.
    pub request: Duration,
    /// WebSocket dial + upgrade.
    pub upgrade: Duration,
    pub tcp_keepalive: Duration,
}

impl Default for HandshakeTimeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            request: DEFAULT_REQUEST_TIMEOUT,
            upgrade: DEFAULT_UPGRADE_TIMEOUT,
            tcp_keepalive: DEFAULT_TCP_KEEPALIVE,
        }
    }
}

/// Everything needed to establish and run one device connection.
///
/// Usually produced by [`DeviceClientBuilder`](crate::DeviceClientBuilder).
#[derive(Clone)]
pub struct ClientConfig {
    pub identity: DeviceIdentity,
    /// Discovery URL, e.g. `https://fabric.example.com:8080/api/v2/device`.
    pub destination_url: String,
    /// Client certificate (PEM).  Only used together with `key_path`.
    pub cert_path: Option<PathBuf>,
    /// Client private key (PEM).  Only used together with `cert_path`.
    pub key_path: Option<PathBuf>,
    /// Extra trust anchors (PEM bundle), added to the bundled webpki roots.
    /// For fabrics whose discovery or backend nodes use a private CA.
    pub ca_path: Option<PathBuf>,
    /// Handlers, in dispatch order.
    pub handlers: Vec<HandlerRegistration>,
    pub on_ping_miss: Option<PingMissCallback>,
    /// Explicit log destination.  `None` logs to the ambient default
    /// dispatcher, which is a no-op unless the process installed one.
    pub logger: Option<tracing::Dispatch>,
    pub keepalive: KeepaliveConfig,
    pub timeouts: HandshakeTimeouts,
    pub max_message_bytes: usize,
    pub write_buffer_bytes: usize,
}

impl ClientConfig {
    pub fn new(identity: DeviceIdentity, destination_url: impl Into<String>) -> Self {
        Self {
            identity,
            destination_url: destination_url.into(),
            cert_path: None,
            key_path: None,
            ca_path: None,
            handlers: Vec::new(),
            on_ping_miss: None,
            logger: None,
            keepalive: KeepaliveConfig::default(),
            timeouts: HandshakeTimeouts::default(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            write_buffer_bytes: DEFAULT_WRITE_BUFFER_BYTES,
        }
    }

    /// Reject settings the client cannot run with.  Needs no network.
    pub fn validate(&self) -> Result<()> {
        if self.destination_url.trim().is_empty() {
            return Err(DeviceSdkError::Config("destination_url is required".into()));
        }
        self.identity.device_id()?;

        let KeepaliveConfig {
            ping_period,
            pong_wait,
            write_wait,
            max_missed_pings,
        } = self.keepalive;
        for (name, d) in [
            ("ping_period", ping_period),
            ("pong_wait", pong_wait),
            ("write_wait", write_wait),
            ("connect timeout", self.timeouts.connect),
            ("request timeout", self.timeouts.request),
            ("upgrade timeout", self.timeouts.upgrade),
        ] {
            if d.is_zero() {
                return Err(DeviceSdkError::Config(format!("{name} must be non-zero")));
            }
        }
        if pong_wait <= ping_period {
            return Err(DeviceSdkError::Config(format!(
                "pong_wait ({pong_wait:?}) must exceed ping_period ({ping_period:?})"
            )));
        }
        if max_missed_pings == 0 {
            return Err(DeviceSdkError::Config("max_missed_pings must be at least 1".into()));
        }
        if self.max_message_bytes == 0 {
            return Err(DeviceSdkError::Config("max_message_bytes must be non-zero".into()));
        }
        if self.write_buffer_bytes == 0 {
            return Err(DeviceSdkError::Config("write_buffer_bytes must be non-zero".into()));
        }
        Ok(())
    }

    /// Extra CA bundle, if configured.
    pub(crate) fn ca_bundle_path(&self) -> Option<&PathBuf> {
        self.ca_path.as_ref().filter(|p| !p.as_os_str().is_empty())
    }

    /// The certificate/key pair, if both halves are configured.
    pub(crate) fn client_identity_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        fn non_empty(p: &Option<PathBuf>) -> Option<&PathBuf> {
            p.as_ref().filter(|p| !p.as_os_str().is_empty())
        }
        match (non_empty(&self.cert_path), non_empty(&self.key_path)) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("identity", &self.identity)
            .field("destination_url", &self.destination_url)
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .field("ca_path", &self.ca_path)
            .field("handlers", &self.handlers)
            .field("on_ping_miss", &self.on_ping_miss.is_some())
            .field("logger", &self.logger.is_some())
            .field("keepalive", &self.keepalive)
            .field("timeouts", &self.timeouts)
            .field("max_message_bytes", &self.max_message_bytes)
            .field("write_buffer_bytes", &self.write_buffer_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_period_is_nine_tenths_of_pong_wait() {
        assert_eq!(DEFAULT_PING_PERIOD, DEFAULT_PONG_WAIT * 9 / 10);
    }

    fn valid() -> ClientConfig {
        ClientConfig::new(DeviceIdentity::new("mac:112233445566"), "http://d/api/v2/device")
    }

    #[test]
    fn default_keepalive_tolerates_misses_before_giving_up() {
        let k = KeepaliveConfig::default();
        assert_eq!(k.liveness_window(), Duration::from_secs(270 * 3 + 300));
        // The first miss is detected at the second tick, well inside the window.
        assert!(k.ping_period * 2 < k.liveness_window());
        valid().validate().unwrap();
    }

    #[test]
    fn zero_durations_are_rejected() {
        let mut cfg = valid();
        cfg.keepalive.ping_period = Duration::ZERO;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("ping_period"), "{err}");

        let mut cfg = valid();
        cfg.timeouts.upgrade = Duration::ZERO;
        assert!(matches!(cfg.validate(), Err(DeviceSdkError::Config(_))));
    }

    #[test]
    fn pong_wait_must_exceed_ping_period() {
        let mut cfg = valid();
        cfg.keepalive.pong_wait = cfg.keepalive.ping_period;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("pong_wait"), "{err}");
    }

    #[test]
    fn limits_and_identity_are_checked() {
        let mut cfg = valid();
        cfg.max_message_bytes = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = valid();
        cfg.keepalive.max_missed_pings = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = valid();
        cfg.identity.device_name = "toaster".into();
        assert!(matches!(cfg.validate(), Err(DeviceSdkError::InvalidDeviceId(_))));

        let mut cfg = valid();
        cfg.destination_url = " ".into();
        assert!(matches!(cfg.validate(), Err(DeviceSdkError::Config(_))));
    }

    #[test]
    fn client_identity_requires_both_halves() {
        let mut cfg = ClientConfig::new(DeviceIdentity::new("mac:112233445566"), "http://d");
        assert!(cfg.client_identity_paths().is_none());

        cfg.cert_path = Some("device.crt".into());
        assert!(cfg.client_identity_paths().is_none());

        cfg.key_path = Some(PathBuf::new());
        assert!(cfg.client_identity_paths().is_none());

        cfg.key_path = Some("device.key".into());
        assert!(cfg.client_identity_paths().is_some());
    }
}
