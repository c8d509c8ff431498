//! Physical message connections for wsmux.
//!
//! Provides a uniform, message-oriented view over WebSocket connections:
//! - Client connections (`ws://`, `wss://`)
//! - Server-side TCP listeners with WebSocket upgrade
//! - In-memory connected pairs for tests and embedding
//!
//! This is the lowest layer of wsmux. Everything else builds on top of
//! the [`MessageStream`] type provided here.

pub mod error;
pub mod traits;
pub mod ws;

pub use error::{Result, TransportError};
pub use traits::{MessageSink, MessageSource, MessageStream};
pub use ws::{connect, pair, WebSocketListener};
