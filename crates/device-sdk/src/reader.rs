//! The read loop: the only consumer of the transport's read half.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message as Frame};
use tokio_util::sync::CancellationToken;

use crate::router::HandlerRouter;
use crate::watchdog::PongNotifier;
use crate::writer::FrameWriter;

pub(crate) type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, tungstenite::Error>> + Send>>;

/// Why the read loop ended.
#[derive(Debug)]
pub(crate) enum ReadExit {
    /// The client was closed or torn down by the watchdog.
    Shutdown,
    /// Close frame or end of stream from the peer.
    PeerClosed,
    /// Nothing received within the liveness window.
    LivenessExpired,
    Receive(tungstenite::Error),
    Decode(beacon_protocol::CodecError),
}

pub(crate) struct ReadLoop {
    pub stream: FrameStream,
    pub router: Arc<HandlerRouter>,
    pub pongs: PongNotifier,
    /// Silence tolerated on the read half; any inbound frame restarts it.
    pub liveness: Duration,
    pub writer: Arc<FrameWriter>,
    pub shutdown: CancellationToken,
}

impl ReadLoop {
    /// Receive and dispatch until the transport fails or the client shuts
    /// down, then tear the client down.
    pub(crate) async fn run(mut self) -> ReadExit {
        let exit = self.receive().await;

        match &exit {
            ReadExit::Shutdown => tracing::debug!("read loop stopped"),
            ReadExit::PeerClosed => tracing::info!("peer closed the connection"),
            ReadExit::LivenessExpired => {
                tracing::warn!(window = ?self.liveness, "peer silent for the whole liveness window")
            }
            ReadExit::Receive(e) => tracing::warn!(error = %e, "receive failed"),
            ReadExit::Decode(e) => tracing::error!(error = %e, "undecodable frame, closing"),
        }

        self.shutdown.cancel();
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!(error = %e, "transport shutdown after read loop exit");
        }
        exit
    }

    async fn receive(&mut self) -> ReadExit {
        let deadline = tokio::time::sleep(self.liveness);
        tokio::pin!(deadline);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return ReadExit::Shutdown,
                _ = &mut deadline => return ReadExit::LivenessExpired,
                next = self.stream.next() => next,
            };
            if matches!(next, Some(Ok(_))) {
                deadline.as_mut().reset(Instant::now() + self.liveness);
            }

            let bytes = match next {
                None => return ReadExit::PeerClosed,
                Some(Err(e)) => return ReadExit::Receive(e),
                Some(Ok(Frame::Binary(bytes))) => bytes,
                Some(Ok(Frame::Text(text))) => text.into_bytes(),
                Some(Ok(Frame::Pong(_))) => {
                    // The watchdog may already be gone; nothing to report to.
                    let _ = self.pongs.send(());
                    continue;
                }
                Some(Ok(Frame::Close(frame))) => {
                    tracing::debug!(?frame, "close frame received");
                    return ReadExit::PeerClosed;
                }
                // Pings are answered by the transport itself.
                Some(Ok(Frame::Ping(_))) | Some(Ok(Frame::Frame(_))) => continue,
            };

            let msg = match beacon_protocol::decode(&bytes) {
                Ok(msg) => msg,
                Err(e) => return ReadExit::Decode(e),
            };
            tracing::debug!(
                source = %msg.source,
                dest = %msg.destination,
                transaction_uuid = %msg.transaction_uuid,
                "message received"
            );
            self.router.dispatch(&msg);
        }
    }
}
