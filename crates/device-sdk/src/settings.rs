//! File-based device configuration (TOML).
//!
//! ```toml
//! destination_url = "https://fabric.example.com:8080/api/v2/device"
//! cert_path = "/etc/device/device.crt"
//! key_path = "/etc/device/device.key"
//! ca_path = "/etc/device/fabric-ca.pem"
//!
//! [identity]
//! device_name = "mac:112233445566"
//! firmware_name = "fw-1.0"
//! model_name = "model-x"
//! manufacturer = "acme"
//!
//! [keepalive]
//! ping_period_secs = 270
//! pong_wait_secs = 300
//! max_missed_pings = 3
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{
    HandshakeTimeouts, KeepaliveConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_MESSAGE_BYTES,
    DEFAULT_MAX_MISSED_PINGS, DEFAULT_PING_PERIOD, DEFAULT_PONG_WAIT, DEFAULT_REQUEST_TIMEOUT, DEFAULT_UPGRADE_TIMEOUT,
    DEFAULT_WRITE_WAIT,
};
use crate::error::{DeviceSdkError, Result};
use crate::identity::DeviceIdentity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub identity: DeviceIdentity,
    pub destination_url: String,
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// Extra trust anchors (PEM) for a private fabric CA.
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
    #[serde(default)]
    pub keepalive: KeepaliveSettings,
    #[serde(default)]
    pub limits: LimitSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveSettings {
    #[serde(default = "d_ping_period")]
    pub ping_period_secs: u64,
    /// Must exceed `ping_period_secs`.
    #[serde(default = "d_pong_wait")]
    pub pong_wait_secs: u64,
    #[serde(default = "d_write_wait")]
    pub write_wait_secs: u64,
    #[serde(default = "d_max_missed_pings")]
    pub max_missed_pings: u32,
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self {
            ping_period_secs: d_ping_period(),
            pong_wait_secs: d_pong_wait(),
            write_wait_secs: d_write_wait(),
            max_missed_pings: d_max_missed_pings(),
        }
    }
}

impl KeepaliveSettings {
    pub fn to_config(&self) -> KeepaliveConfig {
        KeepaliveConfig {
            ping_period: Duration::from_secs(self.ping_period_secs),
            pong_wait: Duration::from_secs(self.pong_wait_secs),
            write_wait: Duration::from_secs(self.write_wait_secs),
            max_missed_pings: self.max_missed_pings,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitSettings {
    /// Largest inbound message accepted from the backend.
    #[serde(default = "d_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_message_bytes: d_max_message_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "d_connect")]
    pub connect_secs: u64,
    #[serde(default = "d_request")]
    pub request_secs: u64,
    #[serde(default = "d_upgrade")]
    pub upgrade_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_secs: d_connect(),
            request_secs: d_request(),
            upgrade_secs: d_upgrade(),
        }
    }
}

impl TimeoutSettings {
    pub fn to_config(&self) -> HandshakeTimeouts {
        HandshakeTimeouts {
            connect: Duration::from_secs(self.connect_secs),
            request: Duration::from_secs(self.request_secs),
            upgrade: Duration::from_secs(self.upgrade_secs),
            ..HandshakeTimeouts::default()
        }
    }
}

impl DeviceSettings {
    /// Read and parse a TOML settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DeviceSdkError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
            .map_err(|e| DeviceSdkError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| DeviceSdkError::Config(e.to_string()))
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_ping_period() -> u64 {
    DEFAULT_PING_PERIOD.as_secs()
}
fn d_pong_wait() -> u64 {
    DEFAULT_PONG_WAIT.as_secs()
}
fn d_write_wait() -> u64 {
    DEFAULT_WRITE_WAIT.as_secs()
}
fn d_max_missed_pings() -> u32 {
    DEFAULT_MAX_MISSED_PINGS
}
fn d_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}
fn d_connect() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}
fn d_request() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}
fn d_upgrade() -> u64 {
    DEFAULT_UPGRADE_TIMEOUT.as_secs()
}
