use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};
use wsmux_frame::{
    ConnectionState, Frame, FrameError, FramedTransport, TransportConfig, UniqueId,
    DEFAULT_MAX_CHUNK_SIZE,
};
use wsmux_transport::MessageStream;

use crate::error::{PeerError, Result};

/// Default limit for one reassembled logical message: 64 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Environment override for [`MultiplexerConfig::max_chunk_size`].
pub const ENV_MAX_CHUNK_SIZE: &str = "WSMUX_MAX_CHUNK_SIZE";
/// Environment override for [`MultiplexerConfig::max_message_size`].
pub const ENV_MAX_MESSAGE_SIZE: &str = "WSMUX_MAX_MESSAGE_SIZE";

/// Runtime configuration for a [`ChannelMultiplexer`].
///
/// Channel bookkeeping is not bounded by any setting here. A channel closed
/// locally keeps its id in memory until the peer closes it too, and a channel
/// closed by the peer keeps its slot, including undelivered messages, until it
/// is closed locally. Long-lived connections should close channels on both
/// ends.
#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    /// Largest body written in a single outbound message frame.
    pub max_chunk_size: usize,
    /// Largest logical message accepted from the peer after reassembly.
    pub max_message_size: usize,
    /// Settings for the underlying framed transport.
    pub transport: TransportConfig,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            transport: TransportConfig::default(),
        }
    }
}

impl MultiplexerConfig {
    /// Defaults with `WSMUX_MAX_CHUNK_SIZE` and `WSMUX_MAX_MESSAGE_SIZE`
    /// applied. Unparseable or zero values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = env_size(ENV_MAX_CHUNK_SIZE) {
            config.max_chunk_size = value;
        }
        if let Some(value) = env_size(ENV_MAX_MESSAGE_SIZE) {
            config.max_message_size = value;
        }
        config
    }

    /// Override the outbound chunk size.
    pub fn with_max_chunk_size(mut self, size: usize) -> Self {
        self.max_chunk_size = size;
        self
    }

    /// Override the inbound logical message limit.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

fn env_size(name: &str) -> Option<usize> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(0) | Err(_) => {
            debug!(var = name, value = %raw, "ignoring invalid size override");
            None
        }
        Ok(value) => Some(value),
    }
}

/// Split one logical message into message frames of at most
/// `max_chunk_size` body bytes each.
///
/// Every frame but the last carries `has_more`. An empty payload yields a
/// single empty frame. Chunks share the payload's allocation.
pub fn chunk_message(channel_id: UniqueId, payload: Bytes, max_chunk_size: usize) -> Vec<Frame> {
    let chunk_size = max_chunk_size.max(1);
    if payload.is_empty() {
        return vec![Frame::message(channel_id, false, payload)];
    }

    let total = payload.len();
    let mut frames = Vec::with_capacity(total.div_ceil(chunk_size));
    let mut offset = 0;
    while offset < total {
        let end = (offset + chunk_size).min(total);
        frames.push(Frame::message(
            channel_id,
            end < total,
            payload.slice(offset..end),
        ));
        offset = end;
    }
    frames
}

/// Per-channel state owned by the multiplexer.
struct ChannelSlot {
    reassembly: BytesMut,
    delivered: Option<mpsc::UnboundedSender<Bytes>>,
    inbox: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>>,
    send_lock: Arc<tokio::sync::Mutex<()>>,
    remote_closed: bool,
}

impl ChannelSlot {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            reassembly: BytesMut::new(),
            delivered: Some(tx),
            inbox: Arc::new(tokio::sync::Mutex::new(rx)),
            send_lock: Arc::new(tokio::sync::Mutex::new(())),
            remote_closed: false,
        }
    }

    fn deliver(&self, message: Bytes) {
        if let Some(tx) = &self.delivered {
            let _ = tx.send(message);
        }
    }

    fn shut(&mut self) {
        self.reassembly = BytesMut::new();
        self.delivered = None;
    }
}

struct ChannelTable {
    channels: HashMap<UniqueId, ChannelSlot>,
    closed: HashSet<UniqueId>,
    incoming: Option<mpsc::UnboundedSender<UniqueId>>,
    terminated: bool,
}

impl ChannelTable {
    fn is_known(&self, id: &UniqueId) -> bool {
        self.channels.contains_key(id) || self.closed.contains(id)
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.incoming = None;
        for slot in self.channels.values_mut() {
            slot.shut();
        }
    }
}

struct Inner {
    id: String,
    transport: FramedTransport,
    config: MultiplexerConfig,
    table: Mutex<ChannelTable>,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<UniqueId>>,
    locally_disconnected: AtomicBool,
}

impl Inner {
    fn table(&self) -> MutexGuard<'_, ChannelTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn disconnected_locally(&self) -> bool {
        self.locally_disconnected.load(Ordering::SeqCst)
    }

    /// Error for operations attempted on a connection that is gone.
    fn terminal_error(&self) -> PeerError {
        if self.disconnected_locally() {
            FrameError::NotConnected.into()
        } else {
            FrameError::ConnectionClosed.into()
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.disconnected_locally() || self.table().terminated {
            return Err(self.terminal_error());
        }
        Ok(())
    }

    /// Map a transport write failure. After a fatal violation the transport
    /// was shut down by the dispatcher, which callers see as closed.
    fn write_error(&self, err: FrameError) -> PeerError {
        match err {
            FrameError::NotConnected if !self.disconnected_locally() => {
                FrameError::ConnectionClosed.into()
            }
            other => other.into(),
        }
    }

    fn terminate(&self) {
        self.table().terminate();
    }

    fn route(&self, frame: Frame) -> Result<()> {
        let mut table = self.table();
        match frame {
            Frame::ChannelOpen { channel_id } => {
                if table.is_known(&channel_id) {
                    return Err(PeerError::ProtocolViolation(format!(
                        "channel {channel_id} opened more than once"
                    )));
                }
                table.channels.insert(channel_id, ChannelSlot::new());
                if let Some(incoming) = &table.incoming {
                    let _ = incoming.send(channel_id);
                }
                debug!(peer = %self.id, channel = %channel_id, "peer opened channel");
            }
            Frame::Message {
                channel_id,
                has_more,
                body,
            } => {
                let closed = table.closed.contains(&channel_id);
                let Some(slot) = table.channels.get_mut(&channel_id) else {
                    if closed {
                        trace!(peer = %self.id, channel = %channel_id, "dropping message for closed channel");
                        return Ok(());
                    }
                    return Err(PeerError::UnknownChannel(channel_id));
                };
                if slot.remote_closed {
                    return Err(PeerError::ProtocolViolation(format!(
                        "message on channel {channel_id} after close"
                    )));
                }

                let size = slot.reassembly.len() + body.len();
                if size > self.config.max_message_size {
                    return Err(PeerError::MessageTooLarge {
                        channel: channel_id,
                        size,
                        max: self.config.max_message_size,
                    });
                }

                if has_more {
                    slot.reassembly.extend_from_slice(&body);
                } else if slot.reassembly.is_empty() {
                    slot.deliver(body);
                } else {
                    slot.reassembly.extend_from_slice(&body);
                    let message = slot.reassembly.split().freeze();
                    trace!(peer = %self.id, channel = %channel_id, size = message.len(), "reassembled message");
                    slot.deliver(message);
                }
            }
            Frame::ChannelClose { channel_id } => {
                let table = &mut *table;
                let closed = table.closed.contains(&channel_id);
                match table.channels.get_mut(&channel_id) {
                    Some(slot) => {
                        if !slot.reassembly.is_empty() {
                            debug!(
                                peer = %self.id,
                                channel = %channel_id,
                                discarded = slot.reassembly.len(),
                                "discarding partial message"
                            );
                        }
                        slot.remote_closed = true;
                        slot.shut();
                        debug!(peer = %self.id, channel = %channel_id, "peer closed channel");
                    }
                    None if closed => {
                        table.closed.remove(&channel_id);
                        trace!(peer = %self.id, channel = %channel_id, "channel closed by both sides");
                    }
                    None => return Err(PeerError::UnknownChannel(channel_id)),
                }
            }
        }
        Ok(())
    }
}

/// Multiplexes independent logical channels over one [`FramedTransport`].
///
/// Either side may open channels. Outbound messages are split into frames of
/// at most `max_chunk_size` bytes; inbound frames are reassembled per channel
/// and delivered to [`receive`](Self::receive) only once complete. Frames
/// naming an unknown channel are a protocol violation and end the connection.
///
/// Dropping the multiplexer stops its dispatcher and tears the connection
/// down without the termination handshake; call
/// [`disconnect`](Self::disconnect) for an orderly shutdown.
pub struct ChannelMultiplexer {
    inner: Arc<Inner>,
    dispatcher: JoinHandle<()>,
}

impl ChannelMultiplexer {
    /// Wrap an existing framed transport. Must be called inside a Tokio
    /// runtime; the inbound dispatcher is spawned immediately.
    pub fn new(id: impl Into<String>, transport: FramedTransport, config: MultiplexerConfig) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            id: id.into(),
            transport,
            config,
            table: Mutex::new(ChannelTable {
                channels: HashMap::new(),
                closed: HashSet::new(),
                incoming: Some(incoming_tx),
                terminated: false,
            }),
            incoming: tokio::sync::Mutex::new(incoming_rx),
            locally_disconnected: AtomicBool::new(false),
        });
        let dispatcher = tokio::spawn(dispatch_loop(inner.clone()));
        Self { inner, dispatcher }
    }

    /// Wrap an already established message stream.
    pub fn from_stream(id: impl Into<String>, stream: MessageStream, config: MultiplexerConfig) -> Self {
        let transport = FramedTransport::new(stream, config.transport.clone());
        Self::new(id, transport, config)
    }

    /// Open a new channel and announce it to the peer.
    pub async fn open_channel(&self) -> Result<UniqueId> {
        self.inner.ensure_active()?;

        let channel_id = {
            let mut table = self.inner.table();
            let channel_id = loop {
                let candidate = UniqueId::generate();
                if !table.is_known(&candidate) {
                    break candidate;
                }
            };
            table.channels.insert(channel_id, ChannelSlot::new());
            channel_id
        };

        if let Err(err) = self.inner.transport.write_frame(&Frame::open(channel_id)).await {
            self.inner.table().channels.remove(&channel_id);
            return Err(self.inner.write_error(err));
        }

        debug!(peer = %self.inner.id, channel = %channel_id, "opened channel");
        Ok(channel_id)
    }

    /// Wait for the next channel opened by the peer.
    pub async fn accept_channel(&self) -> Result<UniqueId> {
        if self.inner.disconnected_locally() {
            return Err(FrameError::NotConnected.into());
        }
        let mut incoming = self.inner.incoming.lock().await;
        incoming
            .recv()
            .await
            .ok_or(PeerError::Frame(FrameError::ConnectionClosed))
    }

    /// Send one logical message on `channel_id`.
    ///
    /// Frames of concurrent sends on the same channel never interleave.
    pub async fn send(&self, channel_id: UniqueId, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        self.inner.ensure_active()?;

        let send_lock = {
            let table = self.inner.table();
            match table.channels.get(&channel_id) {
                Some(slot) if slot.remote_closed => return Err(PeerError::ChannelClosed(channel_id)),
                Some(slot) => slot.send_lock.clone(),
                None if table.closed.contains(&channel_id) => {
                    return Err(PeerError::ChannelClosed(channel_id))
                }
                None => return Err(PeerError::UnknownChannel(channel_id)),
            }
        };
        let _guard = send_lock.lock().await;

        match self.inner.table().channels.get(&channel_id) {
            Some(slot) if !slot.remote_closed => {}
            _ => return Err(PeerError::ChannelClosed(channel_id)),
        }

        let size = payload.len();
        let frames = chunk_message(channel_id, payload, self.inner.config.max_chunk_size);
        let count = frames.len();
        for frame in &frames {
            self.inner
                .transport
                .write_frame(frame)
                .await
                .map_err(|err| self.inner.write_error(err))?;
        }

        trace!(peer = %self.inner.id, channel = %channel_id, size, frames = count, "sent message");
        Ok(())
    }

    /// Receive the next complete logical message on `channel_id`.
    ///
    /// Messages already reassembled are returned even after the channel or
    /// the connection has closed.
    pub async fn receive(&self, channel_id: UniqueId) -> Result<Bytes> {
        if self.inner.disconnected_locally() {
            return Err(FrameError::NotConnected.into());
        }

        let inbox = {
            let table = self.inner.table();
            match table.channels.get(&channel_id) {
                Some(slot) => slot.inbox.clone(),
                None if table.closed.contains(&channel_id) => {
                    return Err(PeerError::ChannelClosed(channel_id))
                }
                None => return Err(PeerError::UnknownChannel(channel_id)),
            }
        };

        let mut inbox = inbox.lock().await;
        if let Some(message) = inbox.recv().await {
            return Ok(message);
        }

        if self.inner.table().terminated {
            return Err(FrameError::ConnectionClosed.into());
        }
        Err(PeerError::ChannelClosed(channel_id))
    }

    /// Close `channel_id` and notify the peer.
    ///
    /// Waits for an in-flight send on the channel to finish first. Late
    /// frames from the peer for this channel are dropped until the peer's own
    /// close arrives; after that the id is forgotten.
    pub async fn close_channel(&self, channel_id: UniqueId) -> Result<()> {
        self.inner.ensure_active()?;

        let send_lock = {
            let table = self.inner.table();
            match table.channels.get(&channel_id) {
                Some(slot) => slot.send_lock.clone(),
                None if table.closed.contains(&channel_id) => {
                    return Err(PeerError::ChannelClosed(channel_id))
                }
                None => return Err(PeerError::UnknownChannel(channel_id)),
            }
        };
        let _guard = send_lock.lock().await;

        {
            let mut table = self.inner.table();
            let Some(slot) = table.channels.remove(&channel_id) else {
                return Err(PeerError::ChannelClosed(channel_id));
            };
            if !slot.remote_closed {
                table.closed.insert(channel_id);
            }
        }

        self.inner
            .transport
            .write_frame(&Frame::close(channel_id))
            .await
            .map_err(|err| self.inner.write_error(err))?;

        debug!(peer = %self.inner.id, channel = %channel_id, "closed channel");
        Ok(())
    }

    /// Disconnect from the peer, sending the termination message.
    ///
    /// Pending receives fail with `ConnectionClosed`; later operations fail
    /// with `NotConnected`.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.locally_disconnected.store(true, Ordering::SeqCst);
        let result = self.inner.transport.disconnect().await;
        self.inner.terminate();
        debug!(peer = %self.inner.id, "multiplexer disconnected");
        result.map_err(PeerError::from)
    }

    /// Wait until the underlying transport is connected.
    pub async fn connection_established(&self) -> Result<()> {
        self.inner.transport.connection_established().await?;
        Ok(())
    }

    /// True while the connection is usable.
    pub fn connected(&self) -> bool {
        !self.inner.table().terminated && self.inner.transport.connected()
    }

    /// Current state of the underlying transport.
    pub fn state(&self) -> ConnectionState {
        self.inner.transport.state()
    }

    /// True if `channel_id` is registered and not closed by either side.
    pub fn is_open(&self, channel_id: UniqueId) -> bool {
        self.inner
            .table()
            .channels
            .get(&channel_id)
            .is_some_and(|slot| !slot.remote_closed)
    }

    /// Number of registered channels.
    pub fn channel_count(&self) -> usize {
        self.inner.table().channels.len()
    }

    /// Connection label used in logs.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &MultiplexerConfig {
        &self.inner.config
    }
}

impl Drop for ChannelMultiplexer {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

impl std::fmt::Debug for ChannelMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelMultiplexer")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("channels", &self.channel_count())
            .finish()
    }
}

async fn dispatch_loop(inner: Arc<Inner>) {
    loop {
        let frame = match inner.transport.read_frame().await {
            Ok(frame) => frame,
            Err(err) => {
                debug!(peer = %inner.id, error = %err, "inbound dispatch stopped");
                inner.terminate();
                return;
            }
        };

        if let Err(violation) = inner.route(frame) {
            error!(peer = %inner.id, error = %violation, "protocol violation, closing connection");
            inner.terminate();
            if let Err(err) = inner.transport.disconnect().await {
                debug!(peer = %inner.id, error = %err, "disconnect after violation failed");
            }
            return;
        }
    }
}
