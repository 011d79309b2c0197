//! Builder pattern for constructing a [`DeviceClient`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::client::DeviceClient;
use crate::config::{
    ClientConfig, HandshakeTimeouts, KeepaliveConfig, DEFAULT_MAX_MESSAGE_BYTES,
    DEFAULT_WRITE_BUFFER_BYTES,
};
use crate::error::Result;
use crate::identity::DeviceIdentity;
use crate::router::{HandlerRegistration, MessageHandler};
use crate::settings::DeviceSettings;
use crate::watchdog::PingMissCallback;

/// Fluent builder for [`DeviceClient`].
///
/// # Example
///
/// ```rust,no_run
/// # use beacon_device_sdk::{DeviceClientBuilder, Message};
/// # async fn run() -> Result<(), beacon_device_sdk::DeviceSdkError> {
/// let client = DeviceClientBuilder::new()
///     .device_name("mac:112233445566")
///     .firmware_name("fw-1.0")
///     .model_name("model-x")
///     .manufacturer("acme")
///     .destination_url("https://fabric.example.com:8080/api/v2/device")
///     .client_cert("/etc/device/device.crt", "/etc/device/device.key")
///     .handler("^event:device-status/", |msg: &Message| {
///         println!("status change: {}", msg.destination);
///     })
///     .connect()
///     .await?;
/// println!("connected to {}", client.hostname());
/// # Ok(())
/// # }
/// ```
pub struct DeviceClientBuilder {
    pub(crate) identity: DeviceIdentity,
    pub(crate) destination_url: String,
    pub(crate) cert_path: Option<PathBuf>,
    pub(crate) key_path: Option<PathBuf>,
    pub(crate) ca_path: Option<PathBuf>,
    pub(crate) handlers: Vec<HandlerRegistration>,
    pub(crate) on_ping_miss: Option<PingMissCallback>,
    pub(crate) logger: Option<tracing::Dispatch>,
    pub(crate) keepalive: KeepaliveConfig,
    pub(crate) timeouts: HandshakeTimeouts,
    pub(crate) max_message_bytes: usize,
    pub(crate) write_buffer_bytes: usize,
}

impl DeviceClientBuilder {
    pub fn new() -> Self {
        Self {
            identity: DeviceIdentity::default(),
            destination_url: String::new(),
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

    /// Start from a settings file.  Handlers, the miss callback and the
    /// logger still have to be added programmatically.
    pub fn from_settings(settings: &DeviceSettings) -> Self {
        let mut builder = Self::new()
            .identity(settings.identity.clone())
            .destination_url(settings.destination_url.clone())
            .keepalive(settings.keepalive.to_config())
            .timeouts(settings.timeouts.to_config())
            .max_message_bytes(settings.limits.max_message_bytes);
        builder.cert_path = settings.cert_path.clone();
        builder.key_path = settings.key_path.clone();
        builder.ca_path = settings.ca_path.clone();
        builder
    }

    // ── Identity ─────────────────────────────────────────────────────

    /// Set all identity fields at once.
    pub fn identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Device identifier, e.g. `mac:112233445566` or `serial:abc-123`.
    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.identity.device_name = name.into();
        self
    }

    pub fn firmware_name(mut self, name: impl Into<String>) -> Self {
        self.identity.firmware_name = name.into();
        self
    }

    pub fn model_name(mut self, name: impl Into<String>) -> Self {
        self.identity.model_name = name.into();
        self
    }

    pub fn manufacturer(mut self, name: impl Into<String>) -> Self {
        self.identity.manufacturer = name.into();
        self
    }

    // ── Connection ───────────────────────────────────────────────────

    /// Discovery URL the handshake starts from.
    pub fn destination_url(mut self, url: impl Into<String>) -> Self {
        self.destination_url = url.into();
        self
    }

    /// Present a client certificate (PEM files) during TLS handshakes.
    pub fn client_cert(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.cert_path = Some(cert_path.into());
        self.key_path = Some(key_path.into());
        self
    }

    /// Trust the CA certificates in `path` (PEM) on top of the bundled roots.
    pub fn ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_path = Some(path.into());
        self
    }

    // ── Handlers ─────────────────────────────────────────────────────

    /// Register a handler for destinations matching `pattern`.
    ///
    /// Every matching handler runs, in registration order.
    pub fn handler<H: MessageHandler>(mut self, pattern: impl Into<String>, handler: H) -> Self {
        self.handlers.push(HandlerRegistration::new(pattern, handler));
        self
    }

    /// Register an already shared handler.
    pub fn handler_arc(mut self, pattern: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.push(HandlerRegistration::from_arc(pattern, handler));
        self
    }

    /// Called once per ping period the backend leaves unanswered.
    pub fn on_ping_miss<F>(mut self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_ping_miss = Some(Arc::new(f));
        self
    }

    /// Route the client's logs to `logger` instead of the global default.
    pub fn logger(mut self, logger: impl Into<tracing::Dispatch>) -> Self {
        self.logger = Some(logger.into());
        self
    }

    // ── Timing / limits ──────────────────────────────────────────────

    pub fn keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Override the probe period (default 270s).
    pub fn ping_period(mut self, d: Duration) -> Self {
        self.keepalive.ping_period = d;
        self
    }

    /// Override the time allowed for the last tolerated ping's answer (default 300s).
    pub fn pong_wait(mut self, d: Duration) -> Self {
        self.keepalive.pong_wait = d;
        self
    }

    /// Override the per-frame write deadline (default 10s).
    pub fn write_wait(mut self, d: Duration) -> Self {
        self.keepalive.write_wait = d;
        self
    }

    /// Unanswered pings tolerated before the read loop gives up (default 3).
    pub fn max_missed_pings(mut self, n: u32) -> Self {
        self.keepalive.max_missed_pings = n;
        self
    }

    pub fn timeouts(mut self, timeouts: HandshakeTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Largest inbound message accepted (default 2048 bytes).
    pub fn max_message_bytes(mut self, n: usize) -> Self {
        self.max_message_bytes = n;
        self
    }

    pub fn write_buffer_bytes(mut self, n: usize) -> Self {
        self.write_buffer_bytes = n;
        self
    }

    /// Validate and produce the [`ClientConfig`].
    pub fn build(self) -> Result<ClientConfig> {
        if self.cert_path.is_some() != self.key_path.is_some() {
            tracing::warn!("only one of cert_path/key_path is set; connecting without a client certificate");
        }

        let config = ClientConfig {
            identity: self.identity,
            destination_url: self.destination_url,
            cert_path: self.cert_path,
            key_path: self.key_path,
            ca_path: self.ca_path,
            handlers: self.handlers,
            on_ping_miss: self.on_ping_miss,
            logger: self.logger,
            keepalive: self.keepalive,
            timeouts: self.timeouts,
            max_message_bytes: self.max_message_bytes,
            write_buffer_bytes: self.write_buffer_bytes,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build, then [`DeviceClient::connect`].
    pub async fn connect(self) -> Result<DeviceClient> {
        DeviceClient::connect(self.build()?).await
    }
}

impl Default for DeviceClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceSdkError;
    use beacon_protocol::Message;

    fn valid() -> DeviceClientBuilder {
        DeviceClientBuilder::new()
            .device_name("mac:112233445566")
            .destination_url("http://localhost:6400/api/v2/device")
    }

    #[test]
    fn defaults_build() {
        let cfg = valid().build().unwrap();
        assert_eq!(cfg.keepalive, KeepaliveConfig::default());
        assert_eq!(cfg.timeouts, HandshakeTimeouts::default());
        assert_eq!(cfg.max_message_bytes, 2048);
        assert_eq!(cfg.write_buffer_bytes, 65535);
        assert!(cfg.handlers.is_empty());
        assert!(cfg.logger.is_none());
    }

    #[test]
    fn handlers_keep_registration_order() {
        let cfg = valid()
            .handler("^event:a", |_: &Message| {})
            .handler("", |_: &Message| {})
            .handler("^event:b", |_: &Message| {})
            .build()
            .unwrap();
        let patterns: Vec<_> = cfg.handlers.iter().map(|h| h.pattern.as_str()).collect();
        assert_eq!(patterns, ["^event:a", "", "^event:b"]);
    }

    #[test]
    fn missing_destination_is_rejected() {
        let err = DeviceClientBuilder::new()
            .device_name("mac:112233445566")
            .build()
            .unwrap_err();
        assert!(matches!(err, DeviceSdkError::Config(_)));
    }

    #[test]
    fn bad_device_name_is_rejected() {
        let err = valid().device_name("not-a-device").build().unwrap_err();
        assert!(matches!(err, DeviceSdkError::InvalidDeviceId(_)));
    }

    #[test]
    fn pong_wait_must_exceed_ping_period() {
        let err = valid()
            .ping_period(Duration::from_secs(30))
            .pong_wait(Duration::from_secs(30))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("pong_wait"));

        assert!(valid()
            .ping_period(Duration::from_secs(30))
            .pong_wait(Duration::from_secs(31))
            .build()
            .is_ok());
    }

    #[test]
    fn zero_durations_are_rejected() {
        let err = valid().write_wait(Duration::ZERO).build().unwrap_err();
        assert!(err.to_string().contains("write_wait"));
    }

    #[test]
    fn missed_ping_budget_must_be_positive() {
        let err = valid().max_missed_pings(0).build().unwrap_err();
        assert!(err.to_string().contains("max_missed_pings"));

        let cfg = valid().max_missed_pings(1).build().unwrap();
        assert_eq!(
            cfg.keepalive.liveness_window(),
            cfg.keepalive.ping_period + cfg.keepalive.pong_wait
        );
    }

    #[test]
    fn from_settings_carries_every_field() {
        let settings = DeviceSettings::from_toml_str(
            r#"
destination_url = "https://fabric.example.com/api/v2/device"
cert_path = "device.crt"
key_path = "device.key"
ca_path = "fabric-ca.pem"

[identity]
device_name = "uuid:4d3c2b1a"
manufacturer = "acme"

[keepalive]
ping_period_secs = 9
pong_wait_secs = 10
max_missed_pings = 5

[limits]
max_message_bytes = 4096
"#,
        )
        .unwrap();

        let cfg = DeviceClientBuilder::from_settings(&settings)
            .on_ping_miss(|| Ok(()))
            .build()
            .unwrap();
        assert_eq!(cfg.identity.manufacturer, "acme");
        assert_eq!(cfg.destination_url, "https://fabric.example.com/api/v2/device");
        assert_eq!(cfg.cert_path, Some(PathBuf::from("device.crt")));
        assert_eq!(cfg.key_path, Some(PathBuf::from("device.key")));
        assert_eq!(cfg.ca_path, Some(PathBuf::from("fabric-ca.pem")));
        assert_eq!(cfg.keepalive.pong_wait, Duration::from_secs(10));
        assert_eq!(cfg.keepalive.max_missed_pings, 5);
        assert_eq!(cfg.max_message_bytes, 4096);
        assert!(cfg.on_ping_miss.is_some());
    }
}
