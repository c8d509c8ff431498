//! Connection lifecycle on top of the frame reader and writer.
//!
//! A [`FramedTransport`] exclusively owns one physical connection. A background
//! task reads physical messages, pairs message headers with their bodies and
//! queues complete frames; callers pull them with
//! [`FramedTransport::read_frame`]. Writes go straight to the connection under
//! a lock so the two physical messages of a message frame are never
//! interleaved with another frame.
//!
//! ```text
//!  Connecting ──established──▶ Connected ──disconnect() / peer close──▶ Disconnecting ──▶ Disconnected
//!      │                                                                                      ▲
//!      └──────────────────────────── connect error / disconnect() ────────────────────────────┘
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use wsmux_transport::{MessageSink, MessageSource, MessageStream};

use crate::codec::{Frame, DEFAULT_MAX_BODY_SIZE};
use crate::error::{FrameError, Result};
use crate::reader::FrameReader;
use crate::writer::FrameWriter;

/// Default number of decoded frames buffered ahead of `read_frame` callers.
pub const DEFAULT_INBOUND_CAPACITY: usize = 64;

/// Default time an in-flight write, or the termination message, may take
/// once the connection is shutting down.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Lifecycle state of a framed transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Configuration for a framed transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum body size of a single message frame, inbound and outbound.
    /// Default: 16 MiB.
    pub max_body_size: usize,
    /// Frames decoded ahead of the consumer before reading pauses.
    pub inbound_capacity: usize,
    /// How long shutdown waits for a write that is already transmitting.
    /// Past it the write fails with `ConnectionClosed` and the connection is
    /// dropped without the termination message.
    pub shutdown_grace: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Frame-level view of one physical connection.
///
/// All methods take `&self`; the transport can be shared behind an `Arc`.
/// Constructors spawn background tasks and must be called from within a tokio
/// runtime.
pub struct FramedTransport {
    shared: Arc<Shared>,
}

struct Shared {
    config: TransportConfig,
    state: watch::Sender<ConnectionState>,
    writer: Mutex<Option<FrameWriter<MessageSink>>>,
    inbound: Mutex<mpsc::Receiver<Result<Frame>>>,
    shutdown: CancellationToken,
    /// Child of `shutdown`; also cancelled when the peer ends the connection.
    writes: CancellationToken,
    closed_locally: AtomicBool,
    failure: OnceLock<FrameError>,
}

impl FramedTransport {
    /// Wrap an already open connection. The transport starts `Connected`.
    pub fn new(stream: MessageStream, config: TransportConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (sink, source) = stream.into_split();
        let writer = FrameWriter::with_max_body_size(sink, config.max_body_size);

        let shared = Arc::new(Shared::new(
            config,
            ConnectionState::Connected,
            Some(writer),
            rx,
        ));
        shared.spawn_reader(source, tx);
        Self { shared }
    }

    /// Start connecting to a WebSocket URL. The transport starts `Connecting`;
    /// await [`connection_established`](Self::connection_established) before
    /// reading or writing.
    pub fn connect(url: &str, config: TransportConfig) -> Self {
        let url = url.to_string();
        Self::establish(
            async move { wsmux_transport::connect(&url).await },
            config,
        )
    }

    /// Start a transport whose connection is produced by `connecting`.
    pub fn establish<F>(connecting: F, config: TransportConfig) -> Self
    where
        F: Future<Output = wsmux_transport::Result<MessageStream>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(config.inbound_capacity.max(1));
        let shared = Arc::new(Shared::new(config, ConnectionState::Connecting, None, rx));

        let task_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = task_shared.shutdown.cancelled() => return,
                result = connecting => result,
            };
            match result {
                Ok(stream) => task_shared.attach(stream, tx).await,
                Err(err) => {
                    warn!(error = %err, "connection failed before opening");
                    let _ = task_shared.failure.set(FrameError::from(err));
                    task_shared.state.send_replace(ConnectionState::Disconnected);
                }
            }
        });

        Self { shared }
    }

    /// Complete once the physical connection is open.
    ///
    /// Fails with the recorded `ConnectionError` if the connection failed
    /// before opening, or `ConnectionClosed` if it was torn down.
    pub async fn connection_established(&self) -> Result<()> {
        let mut state = self.shared.state.subscribe();
        let current = *state
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
            .map_err(|_| FrameError::ConnectionClosed)?;

        match current {
            ConnectionState::Connected => Ok(()),
            _ => Err(self
                .shared
                .failure
                .get()
                .cloned()
                .unwrap_or(FrameError::ConnectionClosed)),
        }
    }

    /// Read the next complete frame.
    ///
    /// Concurrent callers are served one at a time in call order. After a peer
    /// closure, frames already received are still returned before
    /// `ConnectionClosed`. After a local [`disconnect`](Self::disconnect) this
    /// fails immediately with `NotConnected`.
    pub async fn read_frame(&self) -> Result<Frame> {
        if self.shared.closed_locally.load(Ordering::SeqCst)
            || self.state() == ConnectionState::Connecting
        {
            return Err(FrameError::NotConnected);
        }

        let mut inbound = tokio::select! {
            biased;
            _ = self.shared.shutdown.cancelled() => return Err(FrameError::ConnectionClosed),
            inbound = self.shared.inbound.lock() => inbound,
        };

        tokio::select! {
            biased;
            _ = self.shared.shutdown.cancelled() => Err(FrameError::ConnectionClosed),
            item = inbound.recv() => item.unwrap_or(Err(FrameError::ConnectionClosed)),
        }
    }

    /// Write one frame: its header message, then its body message if present.
    ///
    /// Completes once the messages have been handed to the connection.
    pub async fn write_frame(&self, frame: &Frame) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(FrameError::NotConnected);
        }

        let mut writer = tokio::select! {
            biased;
            _ = self.shared.writes.cancelled() => return Err(FrameError::ConnectionClosed),
            writer = self.shared.writer.lock() => writer,
        };

        if self.shared.writes.is_cancelled() || self.state() != ConnectionState::Connected {
            return Err(FrameError::ConnectionClosed);
        }
        let Some(active) = writer.as_mut() else {
            return Err(FrameError::ConnectionClosed);
        };

        let grace = self.shared.config.shutdown_grace;
        let outcome = tokio::select! {
            result = active.write_frame(frame) => Some(result),
            _ = async {
                self.shared.writes.cancelled().await;
                tokio::time::sleep(grace).await;
            } => None,
        };
        let Some(result) = outcome else {
            // The sink may hold half a frame; it must not carry anything else.
            writer.take();
            debug!("abandoned in-flight write on shutdown");
            return Err(FrameError::ConnectionClosed);
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_disconnect() => {
                drop(writer);
                warn!(error = %err, "write failed, closing connection");
                self.shared.remote_closed(err.clone(), true).await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Cooperatively close the connection.
    ///
    /// Sends the termination message to the peer, then closes the physical
    /// connection. Pending reads and writes fail with `ConnectionClosed`.
    /// Calling it again after closure succeeds without doing anything.
    pub async fn disconnect(&self) -> Result<()> {
        self.shared.closed_locally.store(true, Ordering::SeqCst);

        let mut previous = None;
        self.shared.state.send_if_modified(|state| match *state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                previous = Some(*state);
                *state = ConnectionState::Disconnecting;
                true
            }
            ConnectionState::Disconnecting | ConnectionState::Disconnected => false,
        });

        let Some(previous) = previous else {
            let mut state = self.shared.state.subscribe();
            let _ = state
                .wait_for(|state| *state == ConnectionState::Disconnected)
                .await;
            return Ok(());
        };

        debug!(from = ?previous, "disconnecting");
        self.shared.shutdown.cancel();

        let mut result = Ok(());
        let writer = self.shared.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let grace = self.shared.config.shutdown_grace;
            let closing = async {
                if previous == ConnectionState::Connected {
                    writer.terminate().await
                } else {
                    writer.close().await
                }
            };
            result = match tokio::time::timeout(grace, closing).await {
                Ok(result) => result,
                Err(_) => {
                    debug!("peer not reading, dropping connection without termination message");
                    Ok(())
                }
            };
        }

        self.shared
            .state
            .send_replace(ConnectionState::Disconnected);
        debug!("disconnected");
        result
    }

    /// True only while the transport is `Connected`.
    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Subscribe to lifecycle state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Transport configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }
}

impl Drop for FramedTransport {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl std::fmt::Debug for FramedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedTransport")
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl Shared {
    fn new(
        config: TransportConfig,
        initial: ConnectionState,
        writer: Option<FrameWriter<MessageSink>>,
        inbound: mpsc::Receiver<Result<Frame>>,
    ) -> Self {
        let (state, _) = watch::channel(initial);
        let shutdown = CancellationToken::new();
        Self {
            config,
            state,
            writer: Mutex::new(writer),
            inbound: Mutex::new(inbound),
            writes: shutdown.child_token(),
            shutdown,
            closed_locally: AtomicBool::new(false),
            failure: OnceLock::new(),
        }
    }

    /// Install a freshly opened connection and move to `Connected`.
    async fn attach(self: &Arc<Self>, stream: MessageStream, tx: mpsc::Sender<Result<Frame>>) {
        debug!(kind = stream.kind(), "connection established");
        let (sink, source) = stream.into_split();

        {
            let mut writer = self.writer.lock().await;
            if self.shutdown.is_cancelled() {
                debug!("disconnected while connecting, dropping connection");
                return;
            }
            *writer = Some(FrameWriter::with_max_body_size(
                sink,
                self.config.max_body_size,
            ));
        }

        self.spawn_reader(source, tx);
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
    }

    fn spawn_reader(self: &Arc<Self>, source: MessageSource, tx: mpsc::Sender<Result<Frame>>) {
        let reader = FrameReader::with_max_body_size(source, self.config.max_body_size);
        tokio::spawn(read_loop(Arc::clone(self), reader, tx));
    }

    /// Handle a connection ended by the peer or by an I/O failure.
    ///
    /// `cancel_pending` fails waiting readers immediately instead of letting
    /// them drain frames already queued.
    async fn remote_closed(&self, reason: FrameError, cancel_pending: bool) {
        let mut was_connected = false;
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnecting;
                was_connected = true;
                true
            } else {
                false
            }
        });
        if !was_connected {
            return;
        }

        let _ = self.failure.set(reason);
        if cancel_pending {
            self.shutdown.cancel();
        } else {
            self.writes.cancel();
        }

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            match tokio::time::timeout(self.config.shutdown_grace, writer.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    debug!(error = %err, "closing connection after peer closure failed");
                }
                Err(_) => debug!("closing connection after peer closure timed out"),
            }
        }
        self.state.send_replace(ConnectionState::Disconnected);
        debug!("disconnected by peer");
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut reader: FrameReader<MessageSource>,
    tx: mpsc::Sender<Result<Frame>>,
) {
    loop {
        let result = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            result = reader.read_frame() => result,
        };

        match result {
            Ok(frame) => {
                trace!(channel = %frame.channel_id(), tag = frame.tag(), "queueing inbound frame");
                let sent = tokio::select! {
                    _ = shared.shutdown.cancelled() => return,
                    sent = tx.send(Ok(frame)) => sent,
                };
                if sent.is_err() {
                    return;
                }
            }
            Err(FrameError::MalformedFrame(reason)) => {
                warn!(%reason, "dropping malformed frame");
            }
            Err(err) => {
                if reader.termination_received() {
                    debug!("peer requested termination");
                } else if matches!(err, FrameError::ConnectionClosed) {
                    debug!("peer closed connection");
                } else {
                    warn!(error = %err, "connection failed");
                }
                shared.remote_closed(err.clone(), false).await;
                let _ = tx.send(Err(err)).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use futures_util::{SinkExt, StreamExt};
    use wsmux_transport::TransportError;

    use super::*;
    use crate::codec::{deserialize, serialize, TERMINATE_MESSAGE};
    use crate::id::UniqueId;

    async fn transport_with_raw_peer() -> (FramedTransport, MessageSink, MessageSource) {
        let (local, remote) = wsmux_transport::pair().await;
        let transport = FramedTransport::new(local, TransportConfig::default());
        let (sink, source) = remote.into_split();
        (transport, sink, source)
    }

    #[tokio::test]
    async fn new_transport_is_connected() {
        let (transport, _sink, _source) = transport_with_raw_peer().await;
        assert!(transport.connected());
        transport.connection_established().await.unwrap();
    }

    #[tokio::test]
    async fn reads_header_frame_from_peer() {
        let (transport, mut sink, _source) = transport_with_raw_peer().await;
        let frame = Frame::open(UniqueId::generate());

        sink.send(serialize(&frame)).await.unwrap();

        assert_eq!(transport.read_frame().await.unwrap(), frame);
    }

    #[tokio::test]
    async fn reads_message_frame_with_payload() {
        let (transport, mut sink, _source) = transport_with_raw_peer().await;
        let id = UniqueId::generate();

        sink.send(serialize(&Frame::message(id, false, Bytes::new())))
            .await
            .unwrap();
        sink.send(Bytes::from_static(&[1, 2, 3])).await.unwrap();

        let frame = transport.read_frame().await.unwrap();
        assert_eq!(frame, Frame::message(id, false, vec![1u8, 2, 3]));
    }

    #[tokio::test]
    async fn writes_frame_to_peer() {
        let (transport, _sink, mut source) = transport_with_raw_peer().await;
        let id = UniqueId::generate();

        transport.write_frame(&Frame::open(id)).await.unwrap();
        transport
            .write_frame(&Frame::message(id, true, Bytes::from_static(b"body")))
            .await
            .unwrap();

        let first = source.next().await.unwrap().unwrap();
        assert_eq!(deserialize(&first).unwrap(), Frame::open(id));
        let header = source.next().await.unwrap().unwrap();
        assert_eq!(
            deserialize(&header).unwrap(),
            Frame::message(id, true, Bytes::new())
        );
        assert_eq!(source.next().await.unwrap().unwrap().as_ref(), b"body");
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped() {
        let (transport, mut sink, _source) = transport_with_raw_peer().await;
        let frame = Frame::close(UniqueId::generate());

        sink.send(Bytes::from_static(&[0xEE, 1, 2])).await.unwrap();
        sink.send(serialize(&frame)).await.unwrap();

        assert_eq!(transport.read_frame().await.unwrap(), frame);
        assert!(transport.connected());
    }

    #[tokio::test]
    async fn concurrent_reads_keep_frame_order() {
        let (transport, mut sink, _source) = transport_with_raw_peer().await;
        let first = Frame::open(UniqueId::generate());
        let second = Frame::close(UniqueId::generate());

        let peer = async {
            sink.send(serialize(&first)).await.unwrap();
            sink.send(serialize(&second)).await.unwrap();
        };
        let (a, b, ()) = tokio::join!(transport.read_frame(), transport.read_frame(), peer);

        assert_eq!(a.unwrap(), first);
        assert_eq!(b.unwrap(), second);
    }

    #[tokio::test]
    async fn fails_on_reading_frame_after_disconnect() {
        let (transport, _sink, _source) = transport_with_raw_peer().await;
        transport.disconnect().await.unwrap();

        let err = transport.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::NotConnected));
    }

    #[tokio::test]
    async fn fails_on_writing_frame_after_disconnect() {
        let (transport, _sink, _source) = transport_with_raw_peer().await;
        transport.disconnect().await.unwrap();

        let err = transport
            .write_frame(&Frame::open(UniqueId::generate()))
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::NotConnected));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_sends_terminate_message_once() {
        let (transport, _sink, mut source) = transport_with_raw_peer().await;

        transport.disconnect().await.unwrap();
        transport.disconnect().await.unwrap();

        let first = source.next().await.unwrap().unwrap();
        assert_eq!(first.as_ref(), TERMINATE_MESSAGE);
        assert!(source.next().await.is_none());
    }

    #[tokio::test]
    async fn disconnect_fails_pending_read() {
        let (transport, _sink, _source) = transport_with_raw_peer().await;
        let transport = Arc::new(transport);

        let pending = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.read_frame().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        transport.disconnect().await.unwrap();
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn disconnect_fails_pending_write() {
        // The peer never reads, so a body larger than the pipe buffer stalls.
        let (transport, _sink, _source) = transport_with_raw_peer().await;
        let transport = Arc::new(transport);

        let pending = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                let body = vec![7u8; 1024 * 1024];
                transport
                    .write_frame(&Frame::message(UniqueId::generate(), false, body))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!pending.is_finished());

        tokio::time::timeout(Duration::from_secs(3), transport.disconnect())
            .await
            .expect("disconnect must not wait on a stalled write")
            .unwrap();
        assert_eq!(transport.state(), ConnectionState::Disconnected);

        let err = tokio::time::timeout(Duration::from_secs(3), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn closes_connection_if_peer_closed_it() {
        let (transport, mut sink, _source) = transport_with_raw_peer().await;
        sink.close().await.unwrap();

        let mut state = transport.watch_state();
        state
            .wait_for(|state| *state == ConnectionState::Disconnected)
            .await
            .unwrap();

        assert!(!transport.connected());
        let err = transport.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn peer_termination_drains_queued_frames() {
        let (transport, mut sink, _source) = transport_with_raw_peer().await;
        let frame = Frame::open(UniqueId::generate());

        sink.send(serialize(&frame)).await.unwrap();
        sink.send(Bytes::from_static(TERMINATE_MESSAGE)).await.unwrap();

        assert_eq!(transport.read_frame().await.unwrap(), frame);
        let err = transport.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
        assert!(!transport.connected());
    }

    #[tokio::test]
    async fn peer_disconnect_is_observed_by_framed_peer() {
        let (left, right) = wsmux_transport::pair().await;
        let left = FramedTransport::new(left, TransportConfig::default());
        let right = FramedTransport::new(right, TransportConfig::default());

        left.disconnect().await.unwrap();

        let err = right.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
        assert!(!right.connected());
        let err = right
            .write_frame(&Frame::open(UniqueId::generate()))
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::NotConnected));
    }

    #[tokio::test]
    async fn establish_moves_to_connected() {
        let (local, remote) = wsmux_transport::pair().await;
        let transport =
            FramedTransport::establish(async move { Ok(local) }, TransportConfig::default());

        transport.connection_established().await.unwrap();
        assert!(transport.connected());

        let (_sink, mut source) = remote.into_split();
        transport
            .write_frame(&Frame::close(UniqueId::generate()))
            .await
            .unwrap();
        assert!(source.next().await.is_some());
    }

    #[tokio::test]
    async fn establish_failure_reports_connection_error() {
        let transport = FramedTransport::establish(
            async { Err(TransportError::Shutdown) },
            TransportConfig::default(),
        );

        let err = transport.connection_established().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionError(_)));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn operations_while_connecting_are_rejected() {
        let transport = FramedTransport::establish(
            std::future::pending::<wsmux_transport::Result<MessageStream>>(),
            TransportConfig::default(),
        );
        assert_eq!(transport.state(), ConnectionState::Connecting);

        let err = transport.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::NotConnected));
        let err = transport
            .write_frame(&Frame::open(UniqueId::generate()))
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::NotConnected));

        transport.disconnect().await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert!(transport.connection_established().await.is_err());
    }

    #[tokio::test]
    async fn connect_to_loopback_listener() {
        let listener = wsmux_transport::WebSocketListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let url = format!("ws://{}", listener.local_addr());

        let client = FramedTransport::connect(&url, TransportConfig::default());
        let server = FramedTransport::new(listener.accept().await.unwrap(), TransportConfig::default());
        client.connection_established().await.unwrap();

        let frame = Frame::message(UniqueId::generate(), false, Bytes::from_static(b"tcp"));
        client.write_frame(&frame).await.unwrap();
        assert_eq!(server.read_frame().await.unwrap(), frame);
    }
}
