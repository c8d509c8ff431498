use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::{debug, trace};

use crate::codec::{deserialize, is_terminate_message, Frame, DEFAULT_MAX_BODY_SIZE};
use crate::error::{FrameError, Result};

/// Reads complete frames from a stream of physical messages.
///
/// A message frame spans two physical messages (header, then body); the
/// reader pairs them so callers always get complete frames.
pub struct FrameReader<S> {
    inner: S,
    max_body_size: usize,
    ended: bool,
    termination_received: bool,
}

impl<S> FrameReader<S>
where
    S: Stream<Item = wsmux_transport::Result<Bytes>> + Unpin,
{
    /// Create a new frame reader with the default body limit.
    pub fn new(inner: S) -> Self {
        Self::with_max_body_size(inner, DEFAULT_MAX_BODY_SIZE)
    }

    /// Create a new frame reader with an explicit body limit.
    pub fn with_max_body_size(inner: S, max_body_size: usize) -> Self {
        Self {
            inner,
            max_body_size,
            ended: false,
            termination_received: false,
        }
    }

    /// Read the next complete frame.
    ///
    /// Returns `Err(FrameError::MalformedFrame)` for an undecodable header; the
    /// offending physical message has been consumed and reading may continue.
    /// Returns `Err(FrameError::ConnectionClosed)` once the peer has sent the
    /// termination message or closed the connection.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        let header = self.next_message().await?;

        if is_terminate_message(&header) {
            debug!("termination message received");
            self.ended = true;
            self.termination_received = true;
            return Err(FrameError::ConnectionClosed);
        }

        let frame = deserialize(&header)?;
        if !matches!(frame, Frame::Message { .. }) {
            trace!(channel = %frame.channel_id(), tag = frame.tag(), "read header frame");
            return Ok(frame);
        }

        let body = self.next_message().await?;
        if body.len() > self.max_body_size {
            return Err(FrameError::PayloadTooLarge {
                size: body.len(),
                max: self.max_body_size,
            });
        }
        trace!(channel = %frame.channel_id(), size = body.len(), "read message frame");
        Ok(frame.with_body(body))
    }

    async fn next_message(&mut self) -> Result<Bytes> {
        if self.ended {
            return Err(FrameError::ConnectionClosed);
        }
        match self.inner.next().await {
            Some(Ok(msg)) => Ok(msg),
            Some(Err(err)) => {
                self.ended = true;
                Err(err.into())
            }
            None => {
                self.ended = true;
                Err(FrameError::ConnectionClosed)
            }
        }
    }

    /// True once the peer's termination message has been read.
    pub fn termination_received(&self) -> bool {
        self.termination_received
    }
}
