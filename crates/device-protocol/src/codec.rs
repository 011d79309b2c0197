//! MessagePack codec for WRP envelopes.
//!
//! Envelopes are encoded as maps keyed by field name (never as positional
//! arrays), which is what the backend expects.

use crate::message::Message;

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("encode: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decode: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode one envelope into the bytes of a single binary frame.
pub fn encode(msg: &Message) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(msg)?)
}

/// Decode the bytes of one frame into an envelope.
pub fn decode(frame: &[u8]) -> Result<Message, CodecError> {
    Ok(rmp_serde::from_slice(frame)?)
}
