//! Device protocol: the wire contract shared by devices and the fleet backend.
//!
//! Devices locate their serving node through an HTTP discovery request,
//! follow the `307` redirect to a WebSocket endpoint and then exchange WRP
//! envelopes, one MessagePack-encoded [`Message`] per binary frame.
//!
//! This crate holds everything both sides must agree on byte-for-byte:
//! the envelope shape, the codec, the device identifier syntax and the
//! header / status constants used by the discovery handshake.

pub mod codec;
pub mod device_id;
pub mod message;

pub use codec::{decode, encode, CodecError};
pub use device_id::{DeviceId, DeviceIdError};
pub use message::{Message, MessageType, UNKNOWN_MESSAGE_TYPE};

/// Header carrying the device identifier on discovery and upgrade requests.
pub const HEADER_DEVICE_NAME: &str = "X-Webpa-Device-Name";
/// Header carrying the firmware name.
pub const HEADER_FIRMWARE_NAME: &str = "X-Webpa-Firmware-Name";
/// Header carrying the hardware model name.
pub const HEADER_MODEL_NAME: &str = "X-Webpa-Model-Name";
/// Header carrying the manufacturer.
pub const HEADER_MANUFACTURER: &str = "X-Webpa-Manufacturer";

/// Path appended to the redirect location to form the WebSocket endpoint.
pub const DEVICE_ENDPOINT_PATH: &str = "/api/v2/device";

/// Backend status: the device is already connected elsewhere / busy.
pub const STATUS_DEVICE_DISCONNECTED: u16 = 523;
/// Backend status: the device's transaction channel is closed.
pub const STATUS_DEVICE_TIMEOUT: u16 = 524;
