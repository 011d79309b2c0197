//! Reference "hello-world" device.
//!
//! Loads its identity and fabric URL from a TOML file, connects, registers
//! three handlers and announces itself with one event:
//!
//! - `^event:device-status/`  : log status changes of any device
//! - `^mac:[0-9a-f]{12}/config`: log configuration pushed to a device
//! - `""` (catch-all)         : count everything received
//!
//! Usage:
//!   beacon-hello-device device.toml
//!   RUST_LOG=beacon_device_sdk=debug beacon-hello-device device.toml --device-name serial:lab-7
//!
//! Runs until Ctrl-C or until the connection dies.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use beacon_device_sdk::{DeviceClientBuilder, DeviceSettings, Message};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Connect a demo device to the fabric and print what it receives.
#[derive(Debug, Parser)]
#[command(name = "beacon-hello-device", version, about)]
struct Cli {
    /// Settings file (see `device.example.toml`).
    #[arg(default_value = "device.toml")]
    config: PathBuf,
    /// Override `identity.device_name` from the settings file.
    #[arg(long)]
    device_name: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = DeviceSettings::load(&cli.config)?;
    if let Some(name) = cli.device_name {
        settings.identity.device_name = name;
    }

    let received = Arc::new(AtomicU64::new(0));
    let counter = received.clone();

    let client = DeviceClientBuilder::from_settings(&settings)
        .handler("^event:device-status/", |msg: &Message| {
            tracing::info!(
                source = %msg.source,
                dest = %msg.destination,
                payload = %String::from_utf8_lossy(&msg.payload),
                "device status event"
            );
        })
        .handler("^mac:[0-9a-f]{12}/config", |msg: &Message| {
            tracing::info!(
                dest = %msg.destination,
                transaction_uuid = %msg.transaction_uuid,
                bytes = msg.payload.len(),
                "configuration pushed"
            );
        })
        .handler("", move |_: &Message| {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .on_ping_miss(|| {
            tracing::warn!("fabric did not answer the last keepalive");
            Ok(())
        })
        .connect()
        .await?;

    tracing::info!(
        device_id = %client.device_id(),
        hostname = %client.hostname(),
        url = %client.connect_url(),
        "connected"
    );

    let hello = serde_json::json!({
        "device_id": client.device_id().as_str(),
        "firmware": settings.identity.firmware_name,
        "version": env!("CARGO_PKG_VERSION"),
    });
    let announce = Message::simple_event(
        format!("{}/hello-device", client.device_id()),
        format!("event:device-status/{}/hello", client.device_id()),
        serde_json::to_vec(&hello)?,
    )
    .with_content_type("application/json");
    client.send(&announce).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT, shutting down"),
        _ = client.wait_closed() => tracing::warn!("connection lost"),
    }

    client.close().await?;
    tracing::info!(received = received.load(Ordering::Relaxed), "bye");
    Ok(())
}
