//! Device identity and the headers derived from it.

use beacon_protocol::{
    DeviceId, DeviceIdError, HEADER_DEVICE_NAME, HEADER_FIRMWARE_NAME, HEADER_MANUFACTURER,
    HEADER_MODEL_NAME,
};
use serde::{Deserialize, Serialize};

/// Immutable description of the device presented during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Device identifier, e.g. `mac:ffffff112233`.
    pub device_name: String,
    #[serde(default)]
    pub firmware_name: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub manufacturer: String,
}

impl DeviceIdentity {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            ..Default::default()
        }
    }

    pub fn firmware_name(mut self, v: impl Into<String>) -> Self {
        self.firmware_name = v.into();
        self
    }

    pub fn model_name(mut self, v: impl Into<String>) -> Self {
        self.model_name = v.into();
        self
    }

    pub fn manufacturer(mut self, v: impl Into<String>) -> Self {
        self.manufacturer = v.into();
        self
    }

    /// Validate and canonicalize the device name.
    pub fn device_id(&self) -> Result<DeviceId, DeviceIdError> {
        DeviceId::parse(&self.device_name)
    }

    /// `WebPA-1.6(<firmware>;<model>/<manufacturer>;)`
    pub fn user_agent(&self) -> String {
        format!(
            "WebPA-1.6({};{}/{};)",
            self.firmware_name, self.model_name, self.manufacturer
        )
    }

    /// Headers sent on both the discovery request and the upgrade request.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            (HEADER_DEVICE_NAME, self.device_name.clone()),
            (HEADER_FIRMWARE_NAME, self.firmware_name.clone()),
            (HEADER_MODEL_NAME, self.model_name.clone()),
            (HEADER_MANUFACTURER, self.manufacturer.clone()),
            ("User-Agent", self.user_agent()),
        ]
    }
}
