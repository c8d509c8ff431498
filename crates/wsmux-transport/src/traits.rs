use std::net::SocketAddr;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};

/// Outbound half of a physical connection: accepts whole binary messages.
pub type MessageSink = Pin<Box<dyn Sink<Bytes, Error = TransportError> + Send>>;

/// Inbound half of a physical connection: yields whole binary messages in
/// arrival order and ends once the peer has closed the connection.
pub type MessageSource = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A connected, message-oriented physical connection.
///
/// This is the fundamental I/O type returned by transport operations. Each
/// item is one opaque binary message; ordering is preserved and message
/// boundaries are never merged or split.
pub struct MessageStream {
    sink: MessageSink,
    source: MessageSource,
    kind: &'static str,
    peer_addr: Option<SocketAddr>,
}

impl MessageStream {
    /// Wrap an open WebSocket.
    ///
    /// Binary and text messages are surfaced as raw bytes. Ping/pong traffic is
    /// answered by the WebSocket layer and never surfaced. A close message ends
    /// the source.
    pub fn from_websocket<S>(ws: WebSocketStream<S>, kind: &'static str) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = ws.split();

        let sink = sink.with(|payload: Bytes| {
            future::ready(Ok::<_, TransportError>(Message::Binary(payload)))
        });

        let source = source.filter_map(|item| {
            future::ready(match item {
                Ok(Message::Binary(payload)) => Some(Ok(payload)),
                Ok(Message::Text(text)) => Some(Ok(Bytes::copy_from_slice(text.as_bytes()))),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "peer sent websocket close");
                    None
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {
                    trace!("skipping websocket control message");
                    None
                }
                Err(err) => Some(Err(TransportError::from(err))),
            })
        });

        Self::from_parts(Box::pin(sink), Box::pin(source), kind)
    }

    /// Assemble a stream from already type-erased halves.
    pub fn from_parts(sink: MessageSink, source: MessageSource, kind: &'static str) -> Self {
        Self {
            sink,
            source,
            kind,
            peer_addr: None,
        }
    }

    /// Record the remote socket address for diagnostics.
    pub fn with_peer_addr(mut self, peer_addr: SocketAddr) -> Self {
        self.peer_addr = Some(peer_addr);
        self
    }

    /// Split into independently owned outbound and inbound halves.
    pub fn into_split(self) -> (MessageSink, MessageSource) {
        (self.sink, self.source)
    }

    /// Transport name for diagnostics.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Remote socket address, when the stream came from a TCP connection.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("type", &self.kind)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}
