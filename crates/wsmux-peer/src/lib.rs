//! Channel multiplexing over a framed WebSocket connection.
//!
//! This is the "just works" layer. Connect to a peer, open channels from
//! either side, and exchange logical messages of any size. Large messages
//! are chunked on the way out and reassembled on the way in.

pub mod connector;
pub mod error;
pub mod listener;
pub mod multiplexer;

pub use connector::{connect, connect_with_config};
pub use error::{PeerError, Result};
pub use listener::PeerListener;
pub use multiplexer::{
    chunk_message, ChannelMultiplexer, MultiplexerConfig, DEFAULT_MAX_MESSAGE_SIZE,
    ENV_MAX_CHUNK_SIZE, ENV_MAX_MESSAGE_SIZE,
};
