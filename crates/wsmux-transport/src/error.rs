use std::net::SocketAddr;

use tokio_tungstenite::tungstenite;

/// Errors that can occur on a physical WebSocket connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind a listener to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to open a WebSocket connection to the specified URL.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        source: tungstenite::Error,
    },

    /// Failed to accept an incoming TCP connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// The WebSocket opening handshake with an accepted peer failed.
    #[error("websocket handshake with {peer} failed: {source}")]
    Handshake {
        peer: SocketAddr,
        source: tungstenite::Error,
    },

    /// A WebSocket protocol or I/O error on an open connection.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// An I/O error occurred outside the WebSocket layer.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
