//! Peer wire protocol
//!
//! Framing, command identifiers and the payload codecs the sync core speaks.

pub mod encoding;
pub mod frame;
pub mod message;
pub mod payload;

pub use frame::{
    FrameCodec, FrameError, FrameHeader, FrameItem, Message, NetworkMagic, ProtocolFrame,
};
pub use message::MessageType;
