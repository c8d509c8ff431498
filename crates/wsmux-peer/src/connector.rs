use tracing::debug;
use wsmux_frame::FramedTransport;

use crate::error::Result;
use crate::multiplexer::{ChannelMultiplexer, MultiplexerConfig};

/// Connect to a listening peer as a client.
pub async fn connect(url: &str) -> Result<ChannelMultiplexer> {
    connect_with_config(url, MultiplexerConfig::default()).await
}

/// Connect with explicit configuration.
///
/// Resolves once the WebSocket handshake has completed.
pub async fn connect_with_config(url: &str, config: MultiplexerConfig) -> Result<ChannelMultiplexer> {
    let transport = FramedTransport::connect(url, config.transport.clone());
    transport.connection_established().await?;
    debug!(url, "connected to peer");
    Ok(ChannelMultiplexer::new(url, transport, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PeerError;

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect(&format!("ws://{addr}")).await.unwrap_err();
        assert!(matches!(err, PeerError::Frame(_)));
    }
}
