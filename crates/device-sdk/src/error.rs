//! Error taxonomy for the device client.
//!
//! Every failure belongs to one [`ErrorClass`]: configuration problems are
//! detected before any network activity, connection problems end
//! construction, runtime problems surface from `send` / `close` (or end a
//! background task, after which the client is closed).

use std::time::Duration;

use beacon_protocol::{CodecError, DeviceIdError, STATUS_DEVICE_DISCONNECTED, STATUS_DEVICE_TIMEOUT};
use serde::Deserialize;
use tokio_tungstenite::tungstenite;

/// Message used for status 523 when the backend sends no usable body.
pub const MSG_DEVICE_BUSY: &str = "ErrorDeviceBusy";
/// Message used for status 524 when the backend sends no usable body.
pub const MSG_TRANSACTIONS_CLOSED: &str =
    "ErrorTransactionsClosed/ErrorTransactionsAlreadyClosed/ErrorDeviceClosed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Configuration,
    Connection,
    Runtime,
}

/// Top-level SDK error.
#[derive(thiserror::Error, Debug)]
pub enum DeviceSdkError {
    #[error("config: {0}")]
    Config(String),
    #[error("config: {0}")]
    InvalidDeviceId(#[from] DeviceIdError),
    #[error("config: invalid handler pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("tls: {0}")]
    Tls(String),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("websocket upgrade: {0}")]
    Upgrade(#[source] tungstenite::Error),
    #[error("{0} timed out after {1:?}")]
    HandshakeTimeout(&'static str, Duration),
    #[error("encode: {0}")]
    Encode(#[source] CodecError),
    #[error("write: {0}")]
    Write(#[source] tungstenite::Error),
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
    #[error("client is closed")]
    Closed,
    #[error("close: {0}")]
    Close(String),
}

impl DeviceSdkError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DeviceSdkError::Config(_)
            | DeviceSdkError::InvalidDeviceId(_)
            | DeviceSdkError::InvalidPattern { .. }
            | DeviceSdkError::Tls(_) => ErrorClass::Configuration,
            DeviceSdkError::Http(_)
            | DeviceSdkError::Server(_)
            | DeviceSdkError::Upgrade(_)
            | DeviceSdkError::HandshakeTimeout(..) => ErrorClass::Connection,
            DeviceSdkError::Encode(_)
            | DeviceSdkError::Write(_)
            | DeviceSdkError::WriteTimeout(_)
            | DeviceSdkError::Closed
            | DeviceSdkError::Close(_) => ErrorClass::Runtime,
        }
    }

    /// The backend's rejection, if the server actively refused the handshake.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            DeviceSdkError::Server(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DeviceSdkError>;

// ── Server rejections ────────────────────────────────────────────────

/// The `{code, message}` body the backend attaches to rejections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerMessage {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl std::fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.code, self.message)
    }
}

/// Why the handshake response was not usable.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeFailure {
    #[error("received invalid response from discovery server (status {0})")]
    UnexpectedStatus(u16),
    #[error("redirect carried no Location header")]
    MissingLocation,
    #[error("redirect location {0:?} is not a usable http(s) URL")]
    InvalidLocation(String),
    #[error("websocket upgrade rejected (status {0})")]
    UpgradeRejected(u16),
}

/// A handshake the backend actively rejected.
#[derive(thiserror::Error, Debug, Clone)]
#[error("message: {message} with error: {cause}")]
pub struct ServerError {
    pub status: u16,
    pub message: ServerMessage,
    #[source]
    pub cause: HandshakeFailure,
}

impl ServerError {
    /// Classify a rejected response from its status and raw body.
    ///
    /// A JSON `{code, message}` body wins.  Without a message, 523 and 524
    /// map to the backend's fixed strings and anything else falls back to
    /// the status's reason phrase.
    pub fn from_response(status: u16, body: &[u8], cause: HandshakeFailure) -> Self {
        let mut message: ServerMessage = serde_json::from_slice(body).unwrap_or_default();

        if message.message.is_empty() {
            message.message = match status {
                STATUS_DEVICE_DISCONNECTED => MSG_DEVICE_BUSY.to_owned(),
                STATUS_DEVICE_TIMEOUT => MSG_TRANSACTIONS_CLOSED.to_owned(),
                _ => reqwest::StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or_default()
                    .to_owned(),
            };
        }
        if message.code == 0 {
            message.code = i64::from(status);
        }

        Self {
            status,
            message,
            cause,
        }
    }

    /// The human-readable rejection message.
    pub fn message(&self) -> &str {
        &self.message.message
    }

    pub fn status(&self) -> u16 {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unexpected(status: u16) -> HandshakeFailure {
        HandshakeFailure::UnexpectedStatus(status)
    }

    #[test]
    fn status_523_without_body_is_device_busy() {
        let err = ServerError::from_response(523, b"", unexpected(523));
        assert_eq!(err.message(), "ErrorDeviceBusy");
        assert_eq!(err.message.code, 523);
    }

    #[test]
    fn status_524_without_body_is_transactions_closed() {
        let err = ServerError::from_response(524, b"", unexpected(524));
        assert_eq!(
            err.message(),
            "ErrorTransactionsClosed/ErrorTransactionsAlreadyClosed/ErrorDeviceClosed"
        );
    }

    #[test]
    fn json_body_message_wins() {
        let err = ServerError::from_response(
            404,
            br#"{"code":404,"message":"not found"}"#,
            unexpected(404),
        );
        assert_eq!(err.message(), "not found");
        assert_eq!(err.message.code, 404);

        // Even over the fixed 523 mapping.
        let err = ServerError::from_response(
            523,
            br#"{"code":523,"message":"device mac:112233445566 is busy"}"#,
            unexpected(523),
        );
        assert_eq!(err.message(), "device mac:112233445566 is busy");
    }

    #[test]
    fn unparseable_body_falls_back_to_reason_phrase() {
        let err = ServerError::from_response(503, b"<html>oops</html>", unexpected(503));
        assert_eq!(err.message(), "Service Unavailable");
        assert_eq!(err.message.code, 503);
    }

    #[test]
    fn display_includes_message_and_cause() {
        let err = ServerError::from_response(403, br#"{"message":"forbidden"}"#, unexpected(403));
        assert_eq!(
            err.to_string(),
            "message: 403:forbidden with error: received invalid response from discovery server (status 403)"
        );
    }

    #[test]
    fn classes() {
        assert_eq!(DeviceSdkError::Config("x".into()).class(), ErrorClass::Configuration);
        assert_eq!(
            DeviceSdkError::Server(ServerError::from_response(523, b"", unexpected(523))).class(),
            ErrorClass::Connection
        );
        assert_eq!(DeviceSdkError::Closed.class(), ErrorClass::Runtime);
        assert_eq!(
            DeviceSdkError::WriteTimeout(Duration::from_secs(10)).class(),
            ErrorClass::Runtime
        );
    }
}
