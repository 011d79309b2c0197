//! The single guarded write half of the transport.
//!
//! Both the caller-driven send path and the watchdog's probes go through
//! [`FrameWriter`], whose mutex serializes frames on the wire.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use beacon_protocol::Message;
use futures_util::{Sink, SinkExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message as Frame};

use crate::error::{DeviceSdkError, Result};

pub(crate) type FrameSink = Pin<Box<dyn Sink<Frame, Error = tungstenite::Error> + Send>>;

pub(crate) struct FrameWriter {
    sink: Mutex<FrameSink>,
    closed: AtomicBool,
    write_wait: Duration,
}

impl FrameWriter {
    pub(crate) fn new<S>(sink: S, write_wait: Duration) -> Self
    where
        S: Sink<Frame, Error = tungstenite::Error> + Send + 'static,
    {
        Self {
            sink: Mutex::new(Box::pin(sink)),
            closed: AtomicBool::new(false),
            write_wait,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Write one frame within the write deadline.
    pub(crate) async fn write(&self, frame: Frame) -> Result<()> {
        if self.is_closed() {
            return Err(DeviceSdkError::Closed);
        }
        let mut sink = self.sink.lock().await;
        // Shutdown may have won the lock race.
        if self.is_closed() {
            return Err(DeviceSdkError::Closed);
        }
        match tokio::time::timeout(self.write_wait, sink.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DeviceSdkError::Write(e)),
            Err(_) => Err(DeviceSdkError::WriteTimeout(self.write_wait)),
        }
    }

    /// Encode then write.  Nothing is written if encoding fails.
    pub(crate) async fn send_message(&self, msg: &Message) -> Result<()> {
        let bytes = beacon_protocol::encode(msg).map_err(DeviceSdkError::Encode)?;
        self.write(Frame::Binary(bytes)).await
    }

    /// Liveness probe.
    pub(crate) async fn ping(&self) -> Result<()> {
        self.write(Frame::Ping(Vec::new())).await
    }

    /// Refuse further writes, then send a close frame and flush, best-effort.
    ///
    /// Only the first call touches the transport; later calls return `Ok`.
    pub(crate) async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(self.write_wait, sink.close()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DeviceSdkError::Write(e)),
            Err(_) => Err(DeviceSdkError::WriteTimeout(self.write_wait)),
        }
    }
}
