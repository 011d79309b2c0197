//! Keepalive watchdog.
//!
//! Every `ping_period` the watchdog sends a ping.  Pongs are observed by the
//! read loop and forwarded here as notifications.  When a whole period
//! passes without a pong for the previous ping, the miss callback fires
//! once for that period.  Misses are advisory: the watchdog keeps probing,
//! and only a failed probe write (or an explicit stop) ends it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::writer::FrameWriter;

/// Called once per ping period in which the peer did not answer.
///
/// Errors are logged and otherwise ignored.
pub type PingMissCallback = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Sender half the read loop uses to report pongs.
pub(crate) type PongNotifier = mpsc::UnboundedSender<()>;

/// Owner-side handle: stop once, then join.
pub(crate) struct Watchdog {
    stop: CancellationToken,
    stopped: AtomicBool,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    pub(crate) fn new(stop: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            stop,
            stopped: AtomicBool::new(false),
            task: parking_lot::Mutex::new(Some(task)),
        }
    }

    /// Signal the watchdog to send a close frame and exit.
    ///
    /// Returns `false` (and signals nothing) if it was already stopped.
    pub(crate) fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.stop.cancel();
        true
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Wait for the watchdog task to finish.  Later calls return at once.
    pub(crate) async fn join(&self) -> Result<(), tokio::task::JoinError> {
        let task = self.task.lock().take();
        match task {
            Some(task) => task.await,
            None => Ok(()),
        }
    }
}

/// The background half.
pub(crate) struct WatchdogTask {
    pub writer: Arc<FrameWriter>,
    pub pongs: mpsc::UnboundedReceiver<()>,
    pub on_miss: Option<PingMissCallback>,
    pub ping_period: Duration,
    /// Explicit stop (close frame, then exit).
    pub stop: CancellationToken,
    /// Client-wide teardown; cancelled by us on probe failure.
    pub shutdown: CancellationToken,
}

impl WatchdogTask {
    pub(crate) async fn run(mut self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.ping_period, self.ping_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut awaiting_pong = false;
        let mut consecutive_misses: u32 = 0;

        loop {
            tokio::select! {
                biased;

                _ = self.stop.cancelled() => {
                    tracing::info!("stopping keepalive watchdog");
                    if let Err(e) = self.writer.shutdown().await {
                        tracing::debug!(error = %e, "close frame not delivered");
                    }
                    self.shutdown.cancel();
                    break;
                }
                _ = self.shutdown.cancelled() => {
                    tracing::debug!("client torn down, keepalive watchdog exiting");
                    break;
                }
                Some(()) = self.pongs.recv() => {
                    tracing::trace!("pong received");
                    awaiting_pong = false;
                    consecutive_misses = 0;
                }
                _ = ticker.tick() => {
                    if awaiting_pong {
                        consecutive_misses += 1;
                        tracing::warn!(consecutive_misses, "peer missed a ping");
                        if let Some(on_miss) = &self.on_miss {
                            if let Err(e) = on_miss() {
                                tracing::warn!(error = %e, "ping miss handler failed");
                            }
                        }
                    }

                    if let Err(e) = self.writer.ping().await {
                        tracing::warn!(error = %e, "keepalive probe failed, tearing down client");
                        if let Err(e) = self.writer.shutdown().await {
                            tracing::debug!(error = %e, "transport shutdown after probe failure");
                        }
                        self.shutdown.cancel();
                        break;
                    }
                    awaiting_pong = true;
                }
            }
        }
    }
}
