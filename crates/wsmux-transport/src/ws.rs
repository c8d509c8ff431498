use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::MessageStream;

/// In-memory buffer size for each direction of a [`pair`].
const PAIR_BUFFER_SIZE: usize = 64 * 1024;

/// Open a client WebSocket connection to `url` (`ws://` or `wss://`).
///
/// Completes once the opening handshake has finished.
pub async fn connect(url: &str) -> Result<MessageStream> {
    let (ws, response) =
        tokio_tungstenite::connect_async(url)
            .await
            .map_err(|source| TransportError::Connect {
                url: url.to_string(),
                source,
            })?;
    debug!(url, status = %response.status(), "connected to websocket");
    Ok(MessageStream::from_websocket(ws, "websocket-client"))
}

/// Build two connected WebSocket endpoints over an in-memory duplex pipe.
///
/// The first element plays the client role, the second the server role. Both
/// speak real WebSocket framing, which makes the pair a drop-in replacement for
/// a TCP connection in tests.
pub async fn pair() -> (MessageStream, MessageStream) {
    let (client_io, server_io) = tokio::io::duplex(PAIR_BUFFER_SIZE);
    let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
    let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
    (
        MessageStream::from_websocket(client, "memory-client"),
        MessageStream::from_websocket(server, "memory-server"),
    )
}

/// WebSocket listener over TCP.
pub struct WebSocketListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl WebSocketListener {
    /// Bind a TCP listener on `addr` (for example `127.0.0.1:9000`).
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        info!(%local_addr, "listening for websocket connections");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept the next TCP connection and complete the WebSocket handshake.
    pub async fn accept(&self) -> Result<MessageStream> {
        let (tcp, peer) = self.listener.accept().await.map_err(TransportError::Accept)?;
        let ws = tokio_tungstenite::accept_async(tcp)
            .await
            .map_err(|source| TransportError::Handshake { peer, source })?;
        debug!(%peer, "accepted websocket connection");
        Ok(MessageStream::from_websocket(ws, "websocket-server").with_peer_addr(peer))
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "websocket"
    }
}
