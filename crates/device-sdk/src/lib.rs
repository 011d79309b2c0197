//! `beacon-device-sdk`: device-side client for the WebPA-style device fabric.
//!
//! A "device" is any process that registers with the fabric's discovery
//! service, is redirected to a backend node, and then holds one long-lived
//! WebSocket to that node.  Messages travel both ways as MessagePack WRP
//! envelopes.  This crate owns the handshake, keepalive, inbound routing
//! and the send path so device authors only write handlers.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  Your device process                                      │
//! │                                                           │
//! │   let client = DeviceClientBuilder::new()                 │
//! │       .device_name("mac:112233445566")                    │
//! │       .destination_url("https://fabric/api/v2/device")    │
//! │       .handler("^event:", on_event)                       │
//! │       .connect()                                          │
//! │       .await?;                                            │
//! │   client.send(&msg).await?;                               │
//! │   client.close().await?;                                  │
//! └───────────────────────────────────────────────────────────┘
//!                │ send                 ▲ handlers
//!                ▼                      │
//!      ┌──────────────────┐   ┌──────────────────┐
//!      │   FrameWriter    │◀──│    Watchdog      │  ping every period,
//!      │ (one write lock) │   │  (probe / miss)  │  close frame on stop
//!      └────────┬─────────┘   └────────▲─────────┘
//!               │                      │ pong
//!               ▼                      │
//!            WebSocket ──────────▶ ReadLoop ──▶ HandlerRouter (RegexSet)
//! ```
//!
//! # Connection flow
//!
//! 1. Validate the device id and compile every handler pattern (no network yet)
//! 2. `GET` the discovery URL with the `X-Webpa-*` identity headers
//! 3. Expect a `307` (directly, or after one transparent redirect hop)
//! 4. Rewrite `Location` to `ws(s)://…/api/v2/device` and upgrade
//! 5. Start the read loop and the keepalive watchdog
//!
//! There is no reconnect: once either background task ends, the client is
//! closed and the owner constructs a new one.

pub mod builder;
pub mod client;
pub mod config;
mod discovery;
pub mod error;
pub mod identity;
mod reader;
pub mod router;
pub mod settings;
mod tls;
mod watchdog;
mod writer;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::DeviceClientBuilder;
pub use client::DeviceClient;
pub use config::{ClientConfig, HandshakeTimeouts, KeepaliveConfig};
pub use error::{DeviceSdkError, ErrorClass, HandshakeFailure, ServerError, ServerMessage};
pub use identity::DeviceIdentity;
pub use router::{HandlerRegistration, MessageHandler};
pub use settings::DeviceSettings;
pub use watchdog::PingMissCallback;

// Re-export protocol types so devices never need to import beacon-protocol directly.
pub use beacon_protocol::{DeviceId, Message, MessageType};
