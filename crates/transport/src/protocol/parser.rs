//! Message framing: the parser contract and the default length-prefixed
//! codec.
//!
//! The parser contract is split along ownership lines. The receive half
//! ([`MessageParser`]) hands out its internal buffer across a suspension
//! point, so exactly one read loop owns it. The send half
//! ([`MessageSerializer`]) is stateless and shared by every write operation
//! of a session. A [`WireCodec`] pairs the two.

use crate::error::ProtocolError;
use crate::protocol::message::{Message, MessageHeader, MessageKind};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::Arc;

/// Size of the fixed frame header:
/// `[len:u32][kind:u8][id:u64][crc:u32]`, big-endian.
pub const HEADER_SIZE: usize = 17;

/// Default maximum frame size (10 MiB).
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Smallest receive reservation the default parser makes.
const MIN_READ_SIZE: usize = 4 * 1024;

/// Receive-side framing state, exclusively owned by one session's read loop.
pub trait MessageParser: Send + 'static {
    /// Expose the receive buffer with room for at least `min_size` more
    /// bytes. A `min_size` of zero lets the parser pick its own reservation.
    fn read_buffer(&mut self, min_size: usize) -> &mut BytesMut;

    /// Consume `count` bytes newly appended to the receive buffer.
    ///
    /// Yields at most one complete message per call; call again with zero to
    /// drain further buffered messages. The second element is the
    /// recommended size of the next receive; zero means the parser will name
    /// a size on the next call.
    ///
    /// # Errors
    ///
    /// Returns an error when the byte stream is unparseable; the session
    /// treats this as a connection failure.
    fn on_bytes_received(
        &mut self,
        count: usize,
    ) -> std::result::Result<(Option<Message>, usize), ProtocolError>;
}

/// Send-side framing shared by every write operation of a session.
pub trait MessageSerializer: Send + Sync + 'static {
    /// Frame `message` into the exact byte ranges to transmit.
    ///
    /// The payload passes through zero-copy; only framing is newly
    /// allocated.
    fn serialize_for_send(&self, message: &Message) -> Vec<Bytes>;
}

/// Factory for the two framing halves of a session.
pub trait WireCodec: Send + Sync + 'static {
    /// Mint the receive-side parser for a new session.
    fn new_parser(&self) -> Box<dyn MessageParser>;

    /// The shared send-side serializer.
    fn serializer(&self) -> Arc<dyn MessageSerializer>;
}

/// The default codec: length-prefixed frames with a CRC32 payload checksum.
pub struct LengthPrefixedCodec {
    max_frame_size: usize,
    serializer: Arc<LengthPrefixedSerializer>,
}

impl LengthPrefixedCodec {
    /// Create a codec with the default maximum frame size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a codec with a custom maximum frame size.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            serializer: Arc::new(LengthPrefixedSerializer),
        }
    }
}

impl Default for LengthPrefixedCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl WireCodec for LengthPrefixedCodec {
    fn new_parser(&self) -> Box<dyn MessageParser> {
        Box::new(LengthPrefixedParser {
            buf: BytesMut::with_capacity(MIN_READ_SIZE),
            max_frame_size: self.max_frame_size,
        })
    }

    fn serializer(&self) -> Arc<dyn MessageSerializer> {
        Arc::clone(&self.serializer) as Arc<dyn MessageSerializer>
    }
}

/// Receive half of [`LengthPrefixedCodec`].
struct LengthPrefixedParser {
    buf: BytesMut,
    max_frame_size: usize,
}

impl LengthPrefixedParser {
    /// Bytes still missing before the buffered header (or frame) completes.
    fn bytes_needed(&self) -> usize {
        if self.buf.len() < HEADER_SIZE {
            return HEADER_SIZE - self.buf.len();
        }
        let payload_len = (&self.buf[..4]).get_u32() as usize;
        (HEADER_SIZE + payload_len).saturating_sub(self.buf.len())
    }

    fn try_decode(&mut self) -> std::result::Result<Option<Message>, ProtocolError> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut header = &self.buf[..HEADER_SIZE];
        let payload_len = header.get_u32() as usize;
        let kind_byte = header.get_u8();
        let id = header.get_u64();
        let checksum = header.get_u32();

        if payload_len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: self.max_frame_size,
            });
        }
        if self.buf.len() < HEADER_SIZE + payload_len {
            return Ok(None);
        }

        let kind = MessageKind::try_from(kind_byte)?;
        self.buf.advance(HEADER_SIZE);
        let payload = self.buf.split_to(payload_len).freeze();

        let actual = crc32fast::hash(&payload);
        if checksum != actual {
            return Err(ProtocolError::ChecksumMismatch {
                expected: checksum,
                actual,
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let header = MessageHeader {
            kind,
            id,
            payload_len: payload_len as u32,
            checksum,
        };
        Ok(Some(Message { header, payload }))
    }
}

impl MessageParser for LengthPrefixedParser {
    fn read_buffer(&mut self, min_size: usize) -> &mut BytesMut {
        let want = min_size.max(MIN_READ_SIZE);
        if self.buf.capacity() - self.buf.len() < want {
            self.buf.reserve(want);
        }
        &mut self.buf
    }

    fn on_bytes_received(
        &mut self,
        _count: usize,
    ) -> std::result::Result<(Option<Message>, usize), ProtocolError> {
        let message = self.try_decode()?;
        let next = if message.is_some() { 0 } else { self.bytes_needed() };
        Ok((message, next))
    }
}

/// Send half of [`LengthPrefixedCodec`].
struct LengthPrefixedSerializer;

impl MessageSerializer for LengthPrefixedSerializer {
    fn serialize_for_send(&self, message: &Message) -> Vec<Bytes> {
        let mut header = BytesMut::with_capacity(HEADER_SIZE);
        #[allow(clippy::cast_possible_truncation)]
        header.put_u32(message.payload.len() as u32);
        header.put_u8(message.header.kind as u8);
        header.put_u64(message.header.id);
        header.put_u32(message.header.checksum);
        vec![header.freeze(), message.payload.clone()]
    }
}
