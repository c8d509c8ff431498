use std::sync::Arc;

use wsmux_transport::TransportError;

/// Errors that can occur during frame encoding/decoding and on a framed
/// transport.
///
/// Cloneable so a single terminal failure can be handed to every pending
/// caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FrameError {
    /// A header could not be decoded (unknown tag or truncated buffer).
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A frame body exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The operation was attempted outside the `Connected` state.
    #[error("not connected")]
    NotConnected,

    /// The connection was closed while the operation was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// The underlying physical connection reported an error.
    #[error("connection error: {0}")]
    ConnectionError(Arc<TransportError>),
}

impl From<TransportError> for FrameError {
    fn from(err: TransportError) -> Self {
        FrameError::ConnectionError(Arc::new(err))
    }
}

impl FrameError {
    /// True for errors that mean the connection is gone for good.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            FrameError::NotConnected | FrameError::ConnectionClosed | FrameError::ConnectionError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
