//! Wire-level types: the message model and the framing contract.

pub mod message;
pub mod parser;

pub use message::{Message, MessageHeader, MessageKind};
pub use parser::{LengthPrefixedCodec, MessageParser, MessageSerializer, WireCodec};
