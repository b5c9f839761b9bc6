//! The transport's currency type: one framed unit of RPC payload.

use crate::error::ProtocolError;
use bytes::Bytes;

/// Role of a message on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// A request expecting a correlated response.
    Request = 0x01,
    /// A response correlated to an earlier request.
    Response = 0x02,
    /// A message with no response.
    OneWay = 0x03,
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(Self::Request),
            0x02 => Ok(Self::Response),
            0x03 => Ok(Self::OneWay),
            _ => Err(ProtocolError::InvalidKind(value)),
        }
    }
}

/// Fixed header carried in front of every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Role of the message.
    pub kind: MessageKind,
    /// Correlation id pairing responses with requests.
    pub id: u64,
    /// Payload length in bytes.
    pub payload_len: u32,
    /// CRC32 of the payload.
    pub checksum: u32,
}

/// One unit of RPC payload moving through a session.
///
/// Ownership passes whole: from session to the upper layer on receive, and
/// from the upper layer into the session on send. The payload is opaque to
/// the transport.
#[derive(Debug, Clone)]
pub struct Message {
    /// Frame header.
    pub header: MessageHeader,
    /// Opaque payload owned by the upper layer.
    pub payload: Bytes,
}

impl Message {
    fn new(kind: MessageKind, id: u64, payload: Bytes) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let header = MessageHeader {
            kind,
            id,
            payload_len: payload.len() as u32,
            checksum: crc32fast::hash(&payload),
        };
        Self { header, payload }
    }

    /// Create a request message.
    #[must_use]
    pub fn request(id: u64, payload: Bytes) -> Self {
        Self::new(MessageKind::Request, id, payload)
    }

    /// Create a response correlated to the request with `id`.
    #[must_use]
    pub fn response(id: u64, payload: Bytes) -> Self {
        Self::new(MessageKind::Response, id, payload)
    }

    /// Create a message that expects no response.
    #[must_use]
    pub fn one_way(payload: Bytes) -> Self {
        Self::new(MessageKind::OneWay, 0, payload)
    }
}
