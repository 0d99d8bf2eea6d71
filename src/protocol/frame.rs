//! Peer wire frames
//!
//! Every message on a peer connection is a 24-byte header followed by the
//! payload:
//!
//! | field    | size | encoding                                   |
//! |----------|------|--------------------------------------------|
//! | magic    | 4    | network identifier                         |
//! | command  | 12   | ASCII, NUL-padded                          |
//! | length   | 4    | payload length, u32 little-endian          |
//! | checksum | 4    | first 4 bytes of double-SHA-256(payload)   |
//!
//! The checksum bytes are written in the order the digest produces them.

use crate::core::sha256d;
use crate::error::Error;
use crate::protocol::message::{COMMAND_SIZE, MessageType};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Size of the fixed frame header in bytes
pub const FRAME_HEADER_SIZE: usize = 24;

/// Largest payload a peer may declare
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;

/// Size of the payload checksum in bytes
pub const CHECKSUM_SIZE: usize = 4;

/// Errors raised while decoding a wire frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The frame belongs to a different network
    #[error("wrong network magic: expected {}, got {}", hex::encode(.expected), hex::encode(.actual))]
    WrongNetwork {
        /// Magic of the configured network
        expected: [u8; 4],
        /// Magic found in the frame
        actual: [u8; 4],
    },

    /// The frame cannot be a valid frame
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// More bytes are needed before the frame can be decoded
    #[error("incomplete frame: {needed} more bytes needed")]
    Incomplete {
        /// Number of missing bytes
        needed: usize,
    },

    /// The payload does not hash to the declared checksum
    #[error(
        "checksum mismatch on '{command}': computed {}, declared {}",
        hex::encode(.expected),
        hex::encode(.actual)
    )]
    ChecksumMismatch {
        /// Command of the discarded frame
        command: String,
        /// Checksum computed over the received payload
        expected: [u8; 4],
        /// Checksum declared in the frame header
        actual: [u8; 4],
    },
}

impl FrameError {
    /// Create a malformed frame error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Whether the connection must be torn down
    ///
    /// A checksum mismatch only costs the one message, and an incomplete frame
    /// just means waiting for more bytes.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::WrongNetwork { .. } | Self::Malformed(_))
    }
}

/// Four-byte identifier of the network a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkMagic(pub [u8; 4]);

impl NetworkMagic {
    /// Main network
    pub const MAIN: NetworkMagic = NetworkMagic([0xE3, 0xE1, 0xF3, 0xE8]);
    /// Public test network
    pub const TESTNET: NetworkMagic = NetworkMagic([0xF4, 0xE5, 0xF3, 0xF4]);
    /// Local regression test network
    pub const REGTEST: NetworkMagic = NetworkMagic([0xDA, 0xB5, 0xBF, 0xFA]);

    /// Resolve a preset name (`main`, `testnet`, `regtest`) or eight hex digits
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Some(Self::MAIN),
            "test" | "testnet" => Some(Self::TESTNET),
            "regtest" => Some(Self::REGTEST),
            other => {
                let bytes = hex::decode(other.trim_start_matches("0x")).ok()?;
                let magic: [u8; 4] = bytes.try_into().ok()?;
                Some(Self(magic))
            }
        }
    }

    /// Raw magic bytes
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl Default for NetworkMagic {
    fn default() -> Self {
        Self::MAIN
    }
}

impl fmt::Display for NetworkMagic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Payload checksum: the leading bytes of double-SHA-256
pub fn checksum(payload: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let digest = sha256d(payload);
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&digest[..CHECKSUM_SIZE]);
    out
}

/// The fixed 24-byte frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Network magic
    pub magic: NetworkMagic,
    /// Command carried by the frame
    pub command: MessageType,
    /// Declared payload length
    pub payload_length: u32,
    /// Declared payload checksum
    pub checksum: [u8; CHECKSUM_SIZE],
}

impl FrameHeader {
    /// Parse the header from the first 24 bytes of `prefix`
    ///
    /// Only the header is read, so this works on a just-received prefix
    /// before the payload has arrived.
    pub fn parse(prefix: &[u8]) -> Result<Self, FrameError> {
        if prefix.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::Incomplete {
                needed: FRAME_HEADER_SIZE - prefix.len(),
            });
        }

        let mut buf = &prefix[..FRAME_HEADER_SIZE];
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        let mut command = [0u8; COMMAND_SIZE];
        buf.copy_to_slice(&mut command);
        let payload_length = buf.get_u32_le();
        let mut checksum = [0u8; CHECKSUM_SIZE];
        buf.copy_to_slice(&mut checksum);

        Ok(Self {
            magic: NetworkMagic(magic),
            command: MessageType::from_command_bytes(&command),
            payload_length,
            checksum,
        })
    }

    /// Total frame size announced by this header
    pub fn frame_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload_length as usize
    }

    fn write_to(&self, buf: &mut impl BufMut) -> Result<(), FrameError> {
        let command = self
            .command
            .to_command_bytes()
            .ok_or_else(|| FrameError::malformed(format!("command '{}' too long", self.command)))?;
        buf.put_slice(&self.magic.0);
        buf.put_slice(&command);
        buf.put_u32_le(self.payload_length);
        buf.put_slice(&self.checksum);
        Ok(())
    }
}

/// A decoded frame whose length and checksum have been verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolFrame {
    /// The frame header
    pub header: FrameHeader,
    /// The payload
    pub payload: Bytes,
}

impl ProtocolFrame {
    /// Command carried by the frame
    pub fn command(&self) -> &MessageType {
        &self.header.command
    }

    /// Split into an outbound-style message
    pub fn into_message(self) -> Message {
        Message {
            command: self.header.command,
            payload: self.payload,
        }
    }
}

/// A command and its payload, independent of network framing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Command
    pub command: MessageType,
    /// Encoded payload
    pub payload: Bytes,
}

impl Message {
    /// Create a new message
    pub fn new(command: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// Message without a payload
    pub fn empty(command: MessageType) -> Self {
        Self::new(command, Bytes::new())
    }
}

/// Encode a complete frame
pub fn encode(magic: NetworkMagic, command: &MessageType, payload: &[u8]) -> Result<Bytes, FrameError> {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    encode_into(magic, command, payload, &mut buf)?;
    Ok(buf.freeze())
}

fn encode_into(
    magic: NetworkMagic,
    command: &MessageType,
    payload: &[u8],
    buf: &mut BytesMut,
) -> Result<(), FrameError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::malformed(format!(
            "payload of {} bytes exceeds maximum {MAX_PAYLOAD_SIZE}",
            payload.len()
        )));
    }
    let header = FrameHeader {
        magic,
        command: command.clone(),
        payload_length: payload.len() as u32,
        checksum: checksum(payload),
    };
    buf.reserve(FRAME_HEADER_SIZE + payload.len());
    header.write_to(buf)?;
    buf.put_slice(payload);
    Ok(())
}

/// Decode exactly one frame from `bytes`
///
/// Checks are applied in order: network magic, declared length against the
/// bytes present, then the payload checksum.
pub fn decode(magic: NetworkMagic, bytes: &[u8]) -> Result<ProtocolFrame, FrameError> {
    let header = FrameHeader::parse(bytes)?;
    check_header(magic, &header)?;

    let declared = header.payload_length as usize;
    let available = bytes.len() - FRAME_HEADER_SIZE;
    if available < declared {
        return Err(FrameError::Incomplete {
            needed: declared - available,
        });
    }
    if available > declared {
        return Err(FrameError::malformed(format!(
            "{} trailing bytes after {declared}-byte payload",
            available - declared
        )));
    }

    let payload = Bytes::copy_from_slice(&bytes[FRAME_HEADER_SIZE..]);
    verify_checksum(header, payload)
}

fn check_header(magic: NetworkMagic, header: &FrameHeader) -> Result<(), FrameError> {
    if header.magic != magic {
        return Err(FrameError::WrongNetwork {
            expected: magic.0,
            actual: header.magic.0,
        });
    }
    if header.payload_length as usize > MAX_PAYLOAD_SIZE {
        return Err(FrameError::malformed(format!(
            "declared payload length {} exceeds maximum {MAX_PAYLOAD_SIZE}",
            header.payload_length
        )));
    }
    Ok(())
}

fn verify_checksum(header: FrameHeader, payload: Bytes) -> Result<ProtocolFrame, FrameError> {
    let computed = checksum(&payload);
    if computed != header.checksum {
        return Err(FrameError::ChecksumMismatch {
            command: header.command.to_string(),
            expected: computed,
            actual: header.checksum,
        });
    }
    Ok(ProtocolFrame { header, payload })
}

/// A decoded frame, or a frame that was consumed but rejected
///
/// Recoverable rejections (checksum mismatch) are surfaced as items so the
/// connection keeps reading; fatal ones are returned as stream errors.
pub type FrameItem = Result<ProtocolFrame, FrameError>;

/// Streaming codec for peer frames
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    magic: NetworkMagic,
}

impl FrameCodec {
    /// Create a codec for the given network
    pub fn new(magic: NetworkMagic) -> Self {
        Self { magic }
    }

    /// Network this codec accepts
    pub fn magic(&self) -> NetworkMagic {
        self.magic
    }
}

impl Decoder for FrameCodec {
    type Item = FrameItem;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match FrameHeader::parse(&src[..]) {
            Ok(header) => header,
            Err(FrameError::Incomplete { needed }) => {
                src.reserve(needed);
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        check_header(self.magic, &header)?;

        let frame_size = header.frame_size();
        if src.len() < frame_size {
            src.reserve(frame_size - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(frame_size).freeze();
        let payload = frame.split_off(FRAME_HEADER_SIZE);
        Ok(Some(verify_checksum(header, payload)))
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_into(self.magic, &item.command, &item.payload, dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ping_frame() -> Bytes {
        encode(NetworkMagic::MAIN, &MessageType::Ping, &42u64.to_le_bytes()).unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let frame = ping_frame();
        assert_eq!(frame.len(), FRAME_HEADER_SIZE + 8);
        assert_eq!(&frame[..4], &NetworkMagic::MAIN.0);
        assert_eq!(&frame[4..8], b"ping");
        assert_eq!(&frame[8..16], &[0u8; 8]);
        assert_eq!(&frame[16..20], &8u32.to_le_bytes());
        assert_eq!(&frame[20..24], &checksum(&42u64.to_le_bytes()));
    }

    #[test]
    fn test_empty_payload_checksum() {
        // First bytes of double-SHA-256 of the empty string
        assert_eq!(checksum(&[]), [0x5d, 0xf6, 0xe0, 0xe2]);
        let frame = encode(NetworkMagic::MAIN, &MessageType::Verack, &[]).unwrap();
        assert_eq!(&frame[20..24], &[0x5d, 0xf6, 0xe0, 0xe2]);
    }

    #[test]
    fn test_decode_roundtrip() {
        let frame = decode(NetworkMagic::MAIN, &ping_frame()).unwrap();
        assert_eq!(frame.command(), &MessageType::Ping);
        assert_eq!(frame.header.payload_length, 8);
        assert_eq!(&frame.payload[..], &42u64.to_le_bytes());
    }

    #[test]
    fn test_decode_wrong_network() {
        let err = decode(NetworkMagic::TESTNET, &ping_frame()).unwrap_err();
        assert!(matches!(err, FrameError::WrongNetwork { .. }));
        assert!(err.is_connection_fatal());
    }

    #[test]
    fn test_decode_incomplete_and_trailing() {
        let frame = ping_frame();
        let err = decode(NetworkMagic::MAIN, &frame[..frame.len() - 3]).unwrap_err();
        assert_eq!(err, FrameError::Incomplete { needed: 3 });
        assert!(!err.is_connection_fatal());

        let err = decode(NetworkMagic::MAIN, &frame[..10]).unwrap_err();
        assert_eq!(err, FrameError::Incomplete { needed: 14 });

        let mut long = frame.to_vec();
        long.push(0);
        let err = decode(NetworkMagic::MAIN, &long).unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
        assert!(err.is_connection_fatal());
    }

    #[test]
    fn test_decode_oversized_declaration() {
        let mut frame = ping_frame().to_vec();
        frame[16..20].copy_from_slice(&(MAX_PAYLOAD_SIZE as u32 + 1).to_le_bytes());
        let err = decode(NetworkMagic::MAIN, &frame).unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn test_decode_checksum_mismatch() {
        let mut frame = ping_frame().to_vec();
        frame[FRAME_HEADER_SIZE] ^= 0x01;
        let err = decode(NetworkMagic::MAIN, &frame).unwrap_err();
        match &err {
            FrameError::ChecksumMismatch { command, actual, .. } => {
                assert_eq!(command, "ping");
                assert_eq!(actual, &frame[20..24]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!err.is_connection_fatal());
    }

    #[test]
    fn test_header_parse_prefix_only() {
        let frame = ping_frame();
        let header = FrameHeader::parse(&frame[..FRAME_HEADER_SIZE]).unwrap();
        assert_eq!(header.command, MessageType::Ping);
        assert_eq!(header.frame_size(), frame.len());
    }

    #[test]
    fn test_codec_streaming() {
        let mut codec = FrameCodec::new(NetworkMagic::MAIN);
        let frame = ping_frame();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&frame[..5]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&frame[5..30]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&frame[30..]);
        buf.extend_from_slice(&frame[..4]);

        let decoded = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(decoded.command(), &MessageType::Ping);
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_codec_skips_corrupt_frame() {
        let mut codec = FrameCodec::new(NetworkMagic::MAIN);
        let mut corrupt = ping_frame().to_vec();
        corrupt[FRAME_HEADER_SIZE + 2] ^= 0xFF;

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&corrupt);
        buf.extend_from_slice(&ping_frame());

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(first, Err(FrameError::ChecksumMismatch { .. })));
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert!(second.is_ok());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_wrong_network_is_fatal() {
        let mut codec = FrameCodec::new(NetworkMagic::REGTEST);
        let mut buf = BytesMut::from(&ping_frame()[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(err.is_connection_fatal());
    }

    #[test]
    fn test_codec_encoder() {
        let mut codec = FrameCodec::new(NetworkMagic::MAIN);
        let mut buf = BytesMut::new();
        codec
            .encode(Message::new(MessageType::Ping, 42u64.to_le_bytes().to_vec()), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], &ping_frame()[..]);
    }

    #[test]
    fn test_network_magic_parse() {
        assert_eq!(NetworkMagic::parse("main"), Some(NetworkMagic::MAIN));
        assert_eq!(NetworkMagic::parse("REGTEST"), Some(NetworkMagic::REGTEST));
        assert_eq!(
            NetworkMagic::parse("0a0b0c0d"),
            Some(NetworkMagic([0x0a, 0x0b, 0x0c, 0x0d]))
        );
        assert_eq!(NetworkMagic::parse("0a0b0c"), None);
        assert_eq!(NetworkMagic::parse("nonsense"), None);
    }

    proptest! {
        #[test]
        fn frame_roundtrip(payload in prop::collection::vec(any::<u8>(), 0..512)) {
            let bytes = encode(NetworkMagic::MAIN, &MessageType::Tx, &payload).unwrap();
            let frame = decode(NetworkMagic::MAIN, &bytes).unwrap();
            prop_assert_eq!(frame.command(), &MessageType::Tx);
            prop_assert_eq!(&frame.payload[..], &payload[..]);
        }

        #[test]
        fn corrupting_one_payload_byte_breaks_checksum(
            payload in prop::collection::vec(any::<u8>(), 1..256),
            index in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut bytes = encode(NetworkMagic::MAIN, &MessageType::Tx, &payload).unwrap().to_vec();
            let position = FRAME_HEADER_SIZE + index.index(payload.len());
            bytes[position] ^= flip;
            let is_checksum_mismatch = matches!(
                decode(NetworkMagic::MAIN, &bytes),
                Err(FrameError::ChecksumMismatch { .. })
            );
            prop_assert!(is_checksum_mismatch);
        }
    }
}
