//! Binary framing with channel ids over message-oriented connections.
//!
//! This is the core protocol layer of wsmux. Every frame is one header
//! message:
//! - A 1-byte frame type tag
//! - A 16-byte channel id
//! - A 1-byte flags field (message frames only, bit 0 = has more)
//!
//! Message frames are followed by one raw body message. The
//! [`FramedTransport`] turns a physical connection into a stream of typed
//! [`Frame`] values and owns the connection lifecycle.

pub mod codec;
pub mod error;
pub mod id;
pub mod reader;
pub mod transport;
pub mod writer;

pub use codec::{
    deserialize, encode_header, serialize, Frame, CHANNEL_HEADER_SIZE, DEFAULT_MAX_BODY_SIZE,
    DEFAULT_MAX_CHUNK_SIZE, FLAG_HAS_MORE, MESSAGE_HEADER_SIZE, PROTOCOL_VERSION,
    TERMINATE_MESSAGE,
};
pub use error::{FrameError, Result};
pub use id::UniqueId;
pub use reader::FrameReader;
pub use transport::{ConnectionState, FramedTransport, TransportConfig};
pub use writer::FrameWriter;
