//! The device client façade: establishment, send, close.

use std::future::Future;
use std::sync::Arc;

use beacon_protocol::{DeviceId, Message};
use futures_util::{Sink, Stream, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message as Frame};
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::Instrument;

use crate::config::ClientConfig;
use crate::error::{DeviceSdkError, Result};
use crate::identity::DeviceIdentity;
use crate::reader::{ReadExit, ReadLoop};
use crate::router::HandlerRouter;
use crate::watchdog::{Watchdog, WatchdogTask};
use crate::writer::FrameWriter;

/// A connected device.
///
/// Created by [`DeviceClient::connect`] (or
/// [`DeviceClientBuilder::connect`](crate::DeviceClientBuilder::connect)).
/// Two background tasks run for the client's lifetime: the read loop, which
/// dispatches inbound messages to the registered handlers, and the keepalive
/// watchdog.  Either one tearing down ends the client; there is no
/// reconnect, so the owner builds a new client.
pub struct DeviceClient {
    identity: DeviceIdentity,
    device_id: DeviceId,
    hostname: String,
    connect_url: Url,
    writer: Arc<FrameWriter>,
    watchdog: Watchdog,
    reader: parking_lot::Mutex<Option<JoinHandle<ReadExit>>>,
    shutdown: CancellationToken,
    logger: Option<tracing::Dispatch>,
}

impl DeviceClient {
    /// Start a new builder.
    pub fn builder() -> crate::builder::DeviceClientBuilder {
        crate::builder::DeviceClientBuilder::new()
    }

    /// Validate the configuration, run the discovery handshake, open the
    /// WebSocket and start the background tasks.
    ///
    /// Configuration errors (bad device id or timing, bad handler pattern,
    /// unreadable certificate) are reported before any network activity.  No partially
    /// constructed client is ever returned.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        match config.logger.clone() {
            Some(dispatch) => Self::establish(config).with_subscriber(dispatch).await,
            None => Self::establish(config).await,
        }
    }

    async fn establish(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let device_id = config.identity.device_id()?;
        let router = HandlerRouter::compile(&config.handlers)?;

        let conn = crate::discovery::establish(&config).await?;
        tracing::info!(
            device_id = %device_id,
            hostname = %conn.hostname,
            handlers = router.len(),
            "device connected"
        );

        let (sink, stream) = conn.ws.split();
        Ok(Self::start(
            config,
            device_id,
            router,
            conn.hostname,
            conn.connect_url,
            sink,
            stream,
        ))
    }

    /// Wire the background tasks onto an already open transport.
    pub(crate) fn start<S, R>(
        config: ClientConfig,
        device_id: DeviceId,
        router: HandlerRouter,
        hostname: String,
        connect_url: Url,
        sink: S,
        stream: R,
    ) -> Self
    where
        S: Sink<Frame, Error = tungstenite::Error> + Send + 'static,
        R: Stream<Item = std::result::Result<Frame, tungstenite::Error>> + Send + 'static,
    {
        let writer = Arc::new(FrameWriter::new(sink, config.keepalive.write_wait));
        let shutdown = CancellationToken::new();
        let stop = CancellationToken::new();
        let (pong_tx, pong_rx) = mpsc::unbounded_channel();
        let logger = config.logger;

        let watchdog_task = spawn(
            logger.as_ref(),
            &device_id,
            WatchdogTask {
                writer: writer.clone(),
                pongs: pong_rx,
                on_miss: config.on_ping_miss,
                ping_period: config.keepalive.ping_period,
                stop: stop.clone(),
                shutdown: shutdown.clone(),
            }
            .run(),
        );

        let reader = spawn(
            logger.as_ref(),
            &device_id,
            ReadLoop {
                stream: Box::pin(stream),
                router: Arc::new(router),
                pongs: pong_tx,
                liveness: config.keepalive.liveness_window(),
                writer: writer.clone(),
                shutdown: shutdown.clone(),
            }
            .run(),
        );

        Self {
            identity: config.identity,
            device_id,
            hostname,
            connect_url,
            writer,
            watchdog: Watchdog::new(stop, watchdog_task),
            reader: parking_lot::Mutex::new(Some(reader)),
            shutdown,
            logger,
        }
    }

    /// Host of the backend node the discovery service redirected us to.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The WebSocket URL the transport was opened against.
    pub fn connect_url(&self) -> &Url {
        &self.connect_url
    }

    /// The normalized device id.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Whether the client has been closed or torn down by a background task.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.writer.is_closed()
    }

    /// Resolves once the client is closed, explicitly or because a
    /// background task ended it.
    pub async fn wait_closed(&self) {
        self.shutdown.cancelled().await
    }

    /// Encode `msg` and write it as one binary frame.
    ///
    /// Encoding happens first: if it fails nothing is written.  The write
    /// is bounded by the configured write deadline.
    pub async fn send(&self, msg: &Message) -> Result<()> {
        let bytes = beacon_protocol::encode(msg).map_err(DeviceSdkError::Encode)?;
        if self.shutdown.is_cancelled() {
            return Err(DeviceSdkError::Closed);
        }
        self.writer.write(Frame::Binary(bytes)).await
    }

    /// Stop the watchdog (which sends a close frame), tear down the
    /// transport and wait for both background tasks to finish.
    ///
    /// Only the first call does anything; later calls return `Ok(())`.
    pub async fn close(&self) -> Result<()> {
        match &self.logger {
            Some(dispatch) => self.close_inner().with_subscriber(dispatch.clone()).await,
            None => self.close_inner().await,
        }
    }

    async fn close_inner(&self) -> Result<()> {
        if !self.watchdog.stop() {
            tracing::debug!(device_id = %self.device_id, "close called again, ignoring");
            return Ok(());
        }
        tracing::info!(device_id = %self.device_id, "closing device client");

        let mut failure = None;
        if let Err(e) = self.watchdog.join().await {
            failure = Some(format!("keepalive task: {e}"));
        }
        self.shutdown.cancel();

        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            match reader.await {
                Ok(exit) => tracing::debug!(?exit, "read loop finished"),
                Err(e) => {
                    failure.get_or_insert(format!("read loop: {e}"));
                }
            }
        }

        match failure {
            Some(reason) => Err(DeviceSdkError::Close(reason)),
            None => Ok(()),
        }
    }
}

impl Drop for DeviceClient {
    fn drop(&mut self) {
        self.watchdog.stop();
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for DeviceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceClient")
            .field("device_id", &self.device_id)
            .field("hostname", &self.hostname)
            .field("connect_url", &self.connect_url.as_str())
            .field("closed", &self.is_closed())
            .field("watchdog_stopped", &self.watchdog.is_stopped())
            .finish()
    }
}

/// Spawn a background task under the client's span and, when one was
/// configured, its explicit logger.
fn spawn<F>(logger: Option<&tracing::Dispatch>, device_id: &DeviceId, fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let device_id = device_id.to_string();
    let task = async move {
        let span = tracing::info_span!("device_client", device_id = %device_id);
        fut.instrument(span).await
    };
    match logger {
        Some(dispatch) => tokio::spawn(task.with_subscriber(dispatch.clone())),
        None => tokio::spawn(task),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::HandlerRegistration;
    use futures_util::SinkExt;
    use parking_lot::Mutex;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::PollSender;

    type Inbound = mpsc::UnboundedSender<std::result::Result<Frame, tungstenite::Error>>;

    struct Harness {
        client: DeviceClient,
        inbound: Inbound,
        outbound: mpsc::Receiver<Frame>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    fn config() -> ClientConfig {
        ClientConfig::new(
            DeviceIdentity::new("mac:11:22:33:44:55:66")
                .firmware_name("fw-1.0")
                .model_name("model-x")
                .manufacturer("acme"),
            "http://discovery.invalid/api/v2/device",
        )
    }

    fn start(mut config: ClientConfig) -> Harness {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        config.handlers.push(HandlerRegistration::new("^event:", move |msg: &Message| {
            log.lock().push(msg.destination.clone())
        }));

        let (out_tx, outbound) = mpsc::channel(64);
        let sink = PollSender::new(out_tx).sink_map_err(|_| tungstenite::Error::ConnectionClosed);
        let (inbound, in_rx) = mpsc::unbounded_channel();
        let stream = futures_util::stream::unfold(in_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        let device_id = config.identity.device_id().unwrap();
        let router = HandlerRouter::compile(&config.handlers).unwrap();
        let client = DeviceClient::start(
            config,
            device_id,
            router,
            "node-7.example.com".into(),
            Url::parse("wss://node-7.example.com:8443/api/v2/device").unwrap(),
            sink,
            stream,
        );
        Harness {
            client,
            inbound,
            outbound,
            seen,
        }
    }

    #[tokio::test]
    async fn accessors_reflect_the_connection() {
        let h = start(config());
        assert_eq!(h.client.hostname(), "node-7.example.com");
        assert_eq!(h.client.device_id().as_str(), "mac:112233445566");
        assert_eq!(h.client.connect_url().scheme(), "wss");
        assert_eq!(h.client.identity().manufacturer, "acme");
        assert!(!h.client.is_closed());
        h.client.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_writes_one_binary_frame() {
        let mut h = start(config());
        let msg = Message::simple_event("mac:112233445566/app", "event:status", b"up".to_vec());
        h.client.send(&msg).await.unwrap();

        match h.outbound.recv().await {
            Some(Frame::Binary(bytes)) => assert_eq!(beacon_protocol::decode(&bytes).unwrap(), msg),
            other => panic!("expected binary frame, got {other:?}"),
        }
        h.client.close().await.unwrap();
    }

    #[tokio::test]
    async fn inbound_messages_reach_handlers() {
        let h = start(config());
        let msg = Message::simple_event("dns:backend", "event:reboot", Vec::new());
        h.inbound
            .send(Ok(Frame::Binary(beacon_protocol::encode(&msg).unwrap())))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while h.seen.lock().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(*h.seen.lock(), vec!["event:reboot".to_string()]);
        h.client.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_ends_sends() {
        let mut h = start(config());
        h.client.close().await.unwrap();
        h.client.close().await.unwrap();
        assert!(h.client.is_closed());

        let msg = Message::simple_event("a", "b", Vec::new());
        assert!(matches!(h.client.send(&msg).await, Err(DeviceSdkError::Closed)));

        // Nothing but the transport close reached the wire.
        while let Ok(frame) = h.outbound.try_recv() {
            assert!(!matches!(frame, Frame::Binary(_)), "unexpected frame {frame:?}");
        }
    }

    #[tokio::test]
    async fn peer_disconnect_tears_the_client_down() {
        let h = start(config());
        h.inbound.send(Ok(Frame::Close(None))).unwrap();

        tokio::time::timeout(Duration::from_secs(5), h.client.wait_closed())
            .await
            .unwrap();
        assert!(h.client.is_closed());

        let msg = Message::simple_event("a", "b", Vec::new());
        assert!(h.client.send(&msg).await.is_err());
        // Close after a background teardown still succeeds.
        h.client.close().await.unwrap();
    }

    #[tokio::test]
    async fn decode_failure_tears_the_client_down() {
        let h = start(config());
        h.inbound.send(Ok(Frame::Binary(vec![0xc1]))).unwrap();
        tokio::time::timeout(Duration::from_secs(5), h.client.wait_closed())
            .await
            .unwrap();
        h.client.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_is_reported_as_misses_before_teardown() {
        let misses = Arc::new(AtomicUsize::new(0));
        let counter = misses.clone();
        let mut cfg = config();
        cfg.on_ping_miss = Some(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        // Default timing: ping every 270s, pong wait 300s, three misses tolerated.
        let mut h = start(cfg);

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(!h.client.is_closed(), "gave up before the first miss could be seen");
        assert_eq!(misses.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(240)).await;
        assert_eq!(misses.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(540)).await;
        assert_eq!(misses.load(Ordering::SeqCst), 3);
        assert!(!h.client.is_closed());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(h.client.is_closed());

        let mut pings = 0;
        while let Ok(frame) = h.outbound.try_recv() {
            if matches!(frame, Frame::Ping(_)) {
                pings += 1;
            }
        }
        assert_eq!(pings, 4);
        h.client.close().await.unwrap();
    }

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn explicit_logger_receives_background_task_logs() {
        let buffer = Buffer::default();
        let sink = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();

        let mut cfg = config();
        cfg.logger = Some(tracing::Dispatch::new(subscriber));
        let h = start(cfg);
        h.client.close().await.unwrap();

        let output = String::from_utf8(buffer.0.lock().clone()).unwrap();
        assert!(output.contains("closing device client"), "{output}");
        assert!(output.contains("stopping keepalive watchdog"), "{output}");
        assert!(output.contains("device_client"), "{output}");
        assert!(output.contains("mac:112233445566"), "{output}");
    }
}
