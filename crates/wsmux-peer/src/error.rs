use wsmux_frame::{FrameError, UniqueId};

/// Errors that can occur in multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error (bind, accept, connect).
    #[error("transport error: {0}")]
    Transport(#[from] wsmux_transport::TransportError),

    /// Frame-level error, including connection state failures.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The channel id is not registered on this connection.
    #[error("unknown channel {0}")]
    UnknownChannel(UniqueId),

    /// The channel was closed by either side.
    #[error("channel {0} closed")]
    ChannelClosed(UniqueId),

    /// The peer broke the framing protocol.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A reassembled logical message exceeds the configured limit.
    #[error("message on channel {channel} too large ({size} bytes, max {max})")]
    MessageTooLarge {
        channel: UniqueId,
        size: usize,
        max: usize,
    },
}

impl PeerError {
    /// True for errors that mean the connection is gone for good.
    pub fn is_disconnect(&self) -> bool {
        match self {
            PeerError::Frame(err) => err.is_disconnect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
