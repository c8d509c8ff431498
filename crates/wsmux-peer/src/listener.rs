use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;
use wsmux_frame::FramedTransport;
use wsmux_transport::WebSocketListener;

use crate::error::Result;
use crate::multiplexer::{ChannelMultiplexer, MultiplexerConfig};

/// Listens for and accepts multiplexed peer connections.
pub struct PeerListener {
    listener: WebSocketListener,
    config: MultiplexerConfig,
    next_peer_id: AtomicU64,
}

impl PeerListener {
    /// Bind a WebSocket listener to `addr`, e.g. `127.0.0.1:0`.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = WebSocketListener::bind(addr).await?;
        Ok(Self {
            listener,
            config: MultiplexerConfig::default(),
            next_peer_id: AtomicU64::new(1),
        })
    }

    /// Override multiplexer config for accepted connections.
    pub fn with_config(mut self, config: MultiplexerConfig) -> Self {
        self.config = config;
        self
    }

    /// Accept next connection and assign an auto-generated peer id.
    pub async fn accept(&self) -> Result<ChannelMultiplexer> {
        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        self.accept_with_id(&format!("peer-{id}")).await
    }

    /// Accept next connection and use explicit peer id.
    pub async fn accept_with_id(&self, peer_id: &str) -> Result<ChannelMultiplexer> {
        let stream = self.listener.accept().await?;
        info!(peer = peer_id, remote = ?stream.peer_addr(), "accepted peer");
        let transport = FramedTransport::new(stream, self.config.transport.clone());
        Ok(ChannelMultiplexer::new(peer_id, transport, self.config.clone()))
    }

    /// Bound socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// WebSocket URL a client can connect to.
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::connector::connect;

    #[tokio::test]
    async fn accept_returns_multiplexer() {
        let listener = PeerListener::bind("127.0.0.1:0").await.unwrap();
        let url = listener.url();

        let (server, client) = tokio::join!(listener.accept(), connect(&url));
        let server = server.unwrap();
        let client = client.unwrap();
        assert_eq!(server.id(), "peer-1");
        assert!(server.connected());

        let channel = client.open_channel().await.unwrap();
        assert_eq!(server.accept_channel().await.unwrap(), channel);
        client.send(channel, Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(server.receive(channel).await.unwrap().as_ref(), b"hi");
    }

    #[tokio::test]
    async fn accepts_multiple_sequential_connections() {
        let listener = PeerListener::bind("127.0.0.1:0").await.unwrap();
        let url = listener.url();

        let (first, c1) = tokio::join!(listener.accept(), connect(&url));
        let (second, c2) = tokio::join!(listener.accept(), connect(&url));
        c1.unwrap();
        c2.unwrap();
        assert_eq!(first.unwrap().id(), "peer-1");
        assert_eq!(second.unwrap().id(), "peer-2");
    }

    #[tokio::test]
    async fn with_config_applies_to_accepted_peers() {
        let listener = PeerListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .with_config(MultiplexerConfig::default().with_max_chunk_size(512));
        let url = listener.url();

        let (server, client) = tokio::join!(listener.accept(), connect(&url));
        client.unwrap();
        assert_eq!(server.unwrap().config().max_chunk_size, 512);
    }
}
