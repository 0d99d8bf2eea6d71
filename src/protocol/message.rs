//! Peer message command identifiers

use std::fmt;

/// Width of the NUL-padded command field in a frame header
pub const COMMAND_SIZE: usize = 12;

/// Peer protocol message types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Connection handshake
    Version,
    /// Handshake acknowledgement
    Verack,
    /// Keep-alive request
    Ping,
    /// Keep-alive reply
    Pong,
    /// Peer address announcement
    Addr,
    /// Peer address request
    GetAddr,
    /// Inventory announcement
    Inv,
    /// Object request by inventory
    GetData,
    /// Requested objects not available
    NotFound,
    /// Header request by block locator
    GetHeaders,
    /// Header batch
    Headers,
    /// Block hash request by block locator
    GetBlocks,
    /// Full block
    Block,
    /// Single transaction
    Tx,
    /// Unconfirmed transaction query
    Mempool,
    /// Install a bloom filter
    FilterLoad,
    /// Add an element to the installed bloom filter
    FilterAdd,
    /// Remove the installed bloom filter
    FilterClear,
    /// Block filtered through the bloom filter
    MerkleBlock,
    /// Rejection notice
    Reject,
    /// Prefer header announcements
    SendHeaders,
    /// Minimum relay fee
    FeeFilter,
    /// Command this node does not understand
    Unknown(String),
}

impl MessageType {
    /// Parse a command token
    pub fn parse_command(s: &str) -> Self {
        match s {
            "version" => Self::Version,
            "verack" => Self::Verack,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "addr" => Self::Addr,
            "getaddr" => Self::GetAddr,
            "inv" => Self::Inv,
            "getdata" => Self::GetData,
            "notfound" => Self::NotFound,
            "getheaders" => Self::GetHeaders,
            "headers" => Self::Headers,
            "getblocks" => Self::GetBlocks,
            "block" => Self::Block,
            "tx" => Self::Tx,
            "mempool" => Self::Mempool,
            "filterload" => Self::FilterLoad,
            "filteradd" => Self::FilterAdd,
            "filterclear" => Self::FilterClear,
            "merkleblock" => Self::MerkleBlock,
            "reject" => Self::Reject,
            "sendheaders" => Self::SendHeaders,
            "feefilter" => Self::FeeFilter,
            _ => Self::Unknown(s.to_string()),
        }
    }

    /// Convert to the command token
    pub fn as_str(&self) -> &str {
        match self {
            Self::Version => "version",
            Self::Verack => "verack",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Addr => "addr",
            Self::GetAddr => "getaddr",
            Self::Inv => "inv",
            Self::GetData => "getdata",
            Self::NotFound => "notfound",
            Self::GetHeaders => "getheaders",
            Self::Headers => "headers",
            Self::GetBlocks => "getblocks",
            Self::Block => "block",
            Self::Tx => "tx",
            Self::Mempool => "mempool",
            Self::FilterLoad => "filterload",
            Self::FilterAdd => "filteradd",
            Self::FilterClear => "filterclear",
            Self::MerkleBlock => "merkleblock",
            Self::Reject => "reject",
            Self::SendHeaders => "sendheaders",
            Self::FeeFilter => "feefilter",
            Self::Unknown(s) => s,
        }
    }

    /// Decode the NUL-padded command field of a frame header
    pub fn from_command_bytes(bytes: &[u8; COMMAND_SIZE]) -> Self {
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(COMMAND_SIZE);
        let token = String::from_utf8_lossy(&bytes[..end]);
        Self::parse_command(&token)
    }

    /// Encode as the NUL-padded command field
    ///
    /// Returns `None` if the token does not fit in twelve bytes.
    pub fn to_command_bytes(&self) -> Option<[u8; COMMAND_SIZE]> {
        let token = self.as_str().as_bytes();
        if token.len() > COMMAND_SIZE {
            return None;
        }
        let mut bytes = [0u8; COMMAND_SIZE];
        bytes[..token.len()].copy_from_slice(token);
        Some(bytes)
    }

    /// Whether this is a command the node understands
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_parse() {
        assert_eq!(MessageType::parse_command("mempool"), MessageType::Mempool);
        assert_eq!(MessageType::Headers.as_str(), "headers");

        let unknown = MessageType::parse_command("xversion");
        assert!(matches!(unknown, MessageType::Unknown(_)));
        assert!(!unknown.is_known());
        assert_eq!(unknown.as_str(), "xversion");
    }

    #[test]
    fn test_command_bytes_padding() {
        let bytes = MessageType::GetHeaders.to_command_bytes().unwrap();
        assert_eq!(&bytes[..10], b"getheaders");
        assert_eq!(&bytes[10..], &[0, 0]);
        assert_eq!(MessageType::from_command_bytes(&bytes), MessageType::GetHeaders);
    }

    #[test]
    fn test_command_too_long() {
        let long = MessageType::Unknown("thirteen-char".to_string());
        assert!(long.to_command_bytes().is_none());
    }

    #[test]
    fn test_full_width_command() {
        let mut bytes = [0u8; COMMAND_SIZE];
        bytes.copy_from_slice(b"twelve-chars");
        let parsed = MessageType::from_command_bytes(&bytes);
        assert_eq!(parsed, MessageType::Unknown("twelve-chars".to_string()));
    }
}
