//! WRP envelope types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// WRP message type, carried on the wire as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum MessageType {
    Auth,
    SimpleRequestResponse,
    SimpleEvent,
    Create,
    Retrieve,
    Update,
    Delete,
    ServiceRegistration,
    ServiceAlive,
    /// A code this implementation does not know about, kept verbatim so a
    /// relayed envelope re-encodes unchanged.
    Unknown(i64),
}

/// Code of the WRP "unknown message type", used when `msg_type` is absent.
pub const UNKNOWN_MESSAGE_TYPE: i64 = 11;

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Unknown(UNKNOWN_MESSAGE_TYPE)
    }
}

impl MessageType {
    pub fn code(self) -> i64 {
        match self {
            MessageType::Auth => 2,
            MessageType::SimpleRequestResponse => 3,
            MessageType::SimpleEvent => 4,
            MessageType::Create => 5,
            MessageType::Retrieve => 6,
            MessageType::Update => 7,
            MessageType::Delete => 8,
            MessageType::ServiceRegistration => 9,
            MessageType::ServiceAlive => 10,
            MessageType::Unknown(code) => code,
        }
    }
}

impl From<i64> for MessageType {
    fn from(code: i64) -> Self {
        match code {
            2 => MessageType::Auth,
            3 => MessageType::SimpleRequestResponse,
            4 => MessageType::SimpleEvent,
            5 => MessageType::Create,
            6 => MessageType::Retrieve,
            7 => MessageType::Update,
            8 => MessageType::Delete,
            9 => MessageType::ServiceRegistration,
            10 => MessageType::ServiceAlive,
            other => MessageType::Unknown(other),
        }
    }
}

impl From<MessageType> for i64 {
    fn from(t: MessageType) -> Self {
        t.code()
    }
}

/// A WRP envelope.
///
/// Field names on the wire follow the backend's MessagePack schema
/// (`dest`, `transaction_uuid`, `rdr`, ...).  Empty optional fields are
/// omitted when encoding and defaulted when decoding; unknown keys are
/// ignored so newer backends can add fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "msg_type", default)]
    pub msg_type: MessageType,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,

    /// Destination address; handler patterns are matched against this.
    #[serde(rename = "dest", default, skip_serializing_if = "String::is_empty")]
    pub destination: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub transaction_uuid: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub accept: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,

    /// Request-delivery-response code.
    #[serde(rename = "rdr", default, skip_serializing_if = "Option::is_none")]
    pub request_delivery_response: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_spans: Option<bool>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    #[serde(default, with = "serde_bytes", skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partner_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
}

impl Message {
    /// A fire-and-forget event from `source` to `destination`.
    pub fn simple_event(
        source: impl Into<String>,
        destination: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            msg_type: MessageType::SimpleEvent,
            source: source.into(),
            destination: destination.into(),
            payload: payload.into(),
            ..Default::default()
        }
    }

    /// A request expecting a response; a fresh transaction id is generated.
    pub fn request(
        source: impl Into<String>,
        destination: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            msg_type: MessageType::SimpleRequestResponse,
            source: source.into(),
            destination: destination.into(),
            transaction_uuid: uuid::Uuid::new_v4().to_string(),
            payload: payload.into(),
            ..Default::default()
        }
    }

    /// Build the response to this request: source and destination swap,
    /// the transaction id is carried over.
    pub fn response(&self, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            msg_type: MessageType::SimpleRequestResponse,
            source: self.destination.clone(),
            destination: self.source.clone(),
            transaction_uuid: self.transaction_uuid.clone(),
            content_type: self.content_type.clone(),
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}
