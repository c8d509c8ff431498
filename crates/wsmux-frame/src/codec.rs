use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::id::{UniqueId, UNIQUE_ID_SIZE};

/// Wire protocol version described by the constants in this module.
pub const PROTOCOL_VERSION: u8 = 1;

/// Tag of a channel-open header.
pub const TAG_CHANNEL_OPEN: u8 = 0x01;
/// Tag of a message header.
pub const TAG_MESSAGE: u8 = 0x02;
/// Tag of a channel-close header.
pub const TAG_CHANNEL_CLOSE: u8 = 0x03;

/// Channel-open/close header: tag (1) + channel id (16) = 17 bytes.
pub const CHANNEL_HEADER_SIZE: usize = 1 + UNIQUE_ID_SIZE;
/// Message header: tag (1) + channel id (16) + flags (1) = 18 bytes.
pub const MESSAGE_HEADER_SIZE: usize = CHANNEL_HEADER_SIZE + 1;

/// Flags bit 0: more chunks of the same logical message follow.
pub const FLAG_HAS_MORE: u8 = 0x01;

/// Sentinel physical message announcing a voluntary disconnect.
///
/// Starts with the reserved tag `0x00`, so it never decodes as a header.
pub const TERMINATE_MESSAGE: &[u8] = &[0x00, b'T', b'E', b'R', b'M'];

/// Default maximum body size of one outbound message frame.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 65_000;

/// Default maximum body size accepted for one inbound message frame: 16 MiB.
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// One protocol unit exchanged on a framed transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Announces a new logical channel.
    ChannelOpen { channel_id: UniqueId },
    /// One chunk of a logical message on `channel_id`.
    Message {
        channel_id: UniqueId,
        has_more: bool,
        body: Bytes,
    },
    /// Announces that a channel is closed.
    ChannelClose { channel_id: UniqueId },
}

impl Frame {
    /// Create a channel-open frame.
    pub fn open(channel_id: UniqueId) -> Self {
        Frame::ChannelOpen { channel_id }
    }

    /// Create a message frame.
    pub fn message(channel_id: UniqueId, has_more: bool, body: impl Into<Bytes>) -> Self {
        Frame::Message {
            channel_id,
            has_more,
            body: body.into(),
        }
    }

    /// Create a channel-close frame.
    pub fn close(channel_id: UniqueId) -> Self {
        Frame::ChannelClose { channel_id }
    }

    /// The channel this frame belongs to.
    pub fn channel_id(&self) -> UniqueId {
        match self {
            Frame::ChannelOpen { channel_id }
            | Frame::Message { channel_id, .. }
            | Frame::ChannelClose { channel_id } => *channel_id,
        }
    }

    /// The body carried after the header, if this frame type has one.
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Frame::Message { body, .. } => Some(body),
            Frame::ChannelOpen { .. } | Frame::ChannelClose { .. } => None,
        }
    }

    /// Wire tag of this frame type.
    pub fn tag(&self) -> u8 {
        match self {
            Frame::ChannelOpen { .. } => TAG_CHANNEL_OPEN,
            Frame::Message { .. } => TAG_MESSAGE,
            Frame::ChannelClose { .. } => TAG_CHANNEL_CLOSE,
        }
    }

    /// Attach a body to a decoded message header. Other frame types are
    /// returned unchanged.
    pub fn with_body(self, body: Bytes) -> Self {
        match self {
            Frame::Message {
                channel_id,
                has_more,
                ..
            } => Frame::Message {
                channel_id,
                has_more,
                body,
            },
            other => other,
        }
    }

    /// Number of physical messages this frame occupies on the wire.
    pub fn physical_messages(&self) -> usize {
        match self {
            Frame::Message { .. } => 2,
            Frame::ChannelOpen { .. } | Frame::ChannelClose { .. } => 1,
        }
    }
}

/// Encode the header of `frame` into `dst`. The body is never included.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────────────┬───────────────────────────┐
/// │ Tag (1B) │ Channel id (16B) │ Flags (1B, message only)  │
/// │          │                  │ bit 0 = has more          │
/// └──────────┴──────────────────┴───────────────────────────┘
/// ```
pub fn encode_header(frame: &Frame, dst: &mut BytesMut) {
    match frame {
        Frame::ChannelOpen { channel_id } | Frame::ChannelClose { channel_id } => {
            dst.reserve(CHANNEL_HEADER_SIZE);
            dst.put_u8(frame.tag());
            dst.put_slice(channel_id.as_bytes());
        }
        Frame::Message {
            channel_id,
            has_more,
            ..
        } => {
            dst.reserve(MESSAGE_HEADER_SIZE);
            dst.put_u8(TAG_MESSAGE);
            dst.put_slice(channel_id.as_bytes());
            dst.put_u8(if *has_more { FLAG_HAS_MORE } else { 0 });
        }
    }
}

/// Serialize the header of `frame` into a standalone buffer.
pub fn serialize(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_SIZE);
    encode_header(frame, &mut buf);
    buf.freeze()
}

/// Decode a header buffer into a frame.
///
/// Message frames come back with an empty body; the caller attaches the body
/// from the following physical message with [`Frame::with_body`]. Bytes past
/// the fixed header length are ignored, and so are reserved flag bits.
pub fn deserialize(src: &[u8]) -> Result<Frame> {
    let Some(&tag) = src.first() else {
        return Err(FrameError::MalformedFrame("empty header".to_string()));
    };

    let expected = match tag {
        TAG_CHANNEL_OPEN | TAG_CHANNEL_CLOSE => CHANNEL_HEADER_SIZE,
        TAG_MESSAGE => MESSAGE_HEADER_SIZE,
        other => {
            return Err(FrameError::MalformedFrame(format!(
                "unknown frame tag 0x{other:02x}"
            )))
        }
    };

    if src.len() < expected {
        return Err(FrameError::MalformedFrame(format!(
            "header too short for tag 0x{tag:02x} ({} bytes, need {expected})",
            src.len()
        )));
    }

    let mut id = [0u8; UNIQUE_ID_SIZE];
    id.copy_from_slice(&src[1..CHANNEL_HEADER_SIZE]);
    let channel_id = UniqueId::from_bytes(id);

    Ok(match tag {
        TAG_CHANNEL_OPEN => Frame::ChannelOpen { channel_id },
        TAG_CHANNEL_CLOSE => Frame::ChannelClose { channel_id },
        _ => Frame::Message {
            channel_id,
            has_more: src[CHANNEL_HEADER_SIZE] & FLAG_HAS_MORE != 0,
            body: Bytes::new(),
        },
    })
}

/// True if `msg` is the termination sentinel.
pub fn is_terminate_message(msg: &[u8]) -> bool {
    msg == TERMINATE_MESSAGE
}
