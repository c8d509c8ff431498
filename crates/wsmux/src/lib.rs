//! Channel multiplexing over WebSocket connections.
//!
//! wsmux carries independent logical channels over one WebSocket. Each
//! logical message may be arbitrarily large; it is split into bounded frames
//! on send and reassembled on receive.
//!
//! # Crate Structure
//!
//! - [`transport`]: physical WebSocket connections and in-memory pairs
//! - [`frame`]: frame codec and the framed transport lifecycle
//! - [`peer`]: channel multiplexer, listener and connector (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use wsmux_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use wsmux_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use wsmux_peer::*;
}
