use bytes::{Bytes, BytesMut};
use futures_util::{Sink, SinkExt};
use tracing::trace;
use wsmux_transport::TransportError;

use crate::codec::{encode_header, Frame, DEFAULT_MAX_BODY_SIZE, MESSAGE_HEADER_SIZE, TERMINATE_MESSAGE};
use crate::error::{FrameError, Result};

/// Writes complete frames to a sink of physical messages.
pub struct FrameWriter<S> {
    inner: S,
    buf: BytesMut,
    max_body_size: usize,
}

impl<S> FrameWriter<S>
where
    S: Sink<Bytes, Error = TransportError> + Unpin,
{
    /// Create a new frame writer with the default body limit.
    pub fn new(inner: S) -> Self {
        Self::with_max_body_size(inner, DEFAULT_MAX_BODY_SIZE)
    }

    /// Create a new frame writer with an explicit body limit.
    pub fn with_max_body_size(inner: S, max_body_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(MESSAGE_HEADER_SIZE),
            max_body_size,
        }
    }

    /// Write a complete frame: the header message, then the body message for
    /// message frames. Both are flushed together.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if let Some(body) = frame.body() {
            if body.len() > self.max_body_size {
                return Err(FrameError::PayloadTooLarge {
                    size: body.len(),
                    max: self.max_body_size,
                });
            }
        }

        encode_header(frame, &mut self.buf);
        let header = self.buf.split().freeze();

        self.inner.feed(header).await?;
        if let Some(body) = frame.body() {
            self.inner.feed(body.clone()).await?;
        }
        self.inner.flush().await?;

        trace!(channel = %frame.channel_id(), tag = frame.tag(), "wrote frame");
        Ok(())
    }

    /// Send the termination message and close the sink.
    pub async fn terminate(&mut self) -> Result<()> {
        self.inner
            .send(Bytes::from_static(TERMINATE_MESSAGE))
            .await?;
        self.close().await
    }

    /// Close the sink without announcing termination.
    pub async fn close(&mut self) -> Result<()> {
        self.inner.close().await?;
        Ok(())
    }
}
