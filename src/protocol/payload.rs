//! Message payload codecs

use crate::core::{BlockHeader, InventoryItem, Sha256Hash};
use crate::core::constants::{BLOCK_HEADER_SIZE, INVENTORY_ITEM_SIZE};
use crate::error::{Error, Result};
use crate::protocol::encoding::{
    ensure_remaining, read_compact_size, read_hash, read_var_bytes, write_compact_size,
    write_var_bytes,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum number of items in one `inv`, `getdata` or `notfound` message
pub const MAX_INVENTORY_ITEMS: usize = 50_000;

/// Maximum number of headers in one `headers` message
pub const MAX_HEADERS_PER_MESSAGE: usize = 2_000;

/// Maximum number of hashes in a block locator
pub const MAX_LOCATOR_HASHES: usize = 101;

/// Protocol version advertised in `getheaders`
pub const PROTOCOL_VERSION: u32 = 70_015;

fn reject_trailing(buf: &impl Buf, what: &str) -> Result<()> {
    if buf.has_remaining() {
        return Err(Error::invalid_payload(format!(
            "{} trailing bytes after {what}",
            buf.remaining()
        )));
    }
    Ok(())
}

/// Encode an inventory list
pub fn encode_inventory(items: &[InventoryItem]) -> Result<Bytes> {
    if items.len() > MAX_INVENTORY_ITEMS {
        return Err(Error::invalid_payload(format!(
            "{} inventory items exceed maximum {MAX_INVENTORY_ITEMS}",
            items.len()
        )));
    }
    let mut buf = BytesMut::with_capacity(9 + items.len() * INVENTORY_ITEM_SIZE);
    write_compact_size(&mut buf, items.len() as u64);
    for item in items {
        item.write_to(&mut buf);
    }
    Ok(buf.freeze())
}

/// Decode an inventory list
pub fn decode_inventory(payload: &[u8]) -> Result<Vec<InventoryItem>> {
    let mut buf = payload;
    let count = read_compact_size(&mut buf)? as usize;
    if count > MAX_INVENTORY_ITEMS {
        return Err(Error::invalid_payload(format!(
            "{count} inventory items exceed maximum {MAX_INVENTORY_ITEMS}"
        )));
    }
    ensure_remaining(&buf, count * INVENTORY_ITEM_SIZE, "inventory list")?;
    let items = (0..count)
        .filter_map(|_| InventoryItem::read_from(&mut buf))
        .collect();
    reject_trailing(&buf, "inventory list")?;
    Ok(items)
}

/// A `getheaders` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetHeaders {
    /// Protocol version of the sender
    pub version: u32,
    /// Block locator, newest first
    pub locator: Vec<Sha256Hash>,
    /// Last hash wanted, or empty for as many as allowed
    pub stop_hash: Sha256Hash,
}

impl GetHeaders {
    /// Request headers following `locator` with no stop hash
    pub fn new(locator: Vec<Sha256Hash>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            locator,
            stop_hash: Sha256Hash::EMPTY,
        }
    }

    /// Encode the payload
    pub fn encode(&self) -> Result<Bytes> {
        if self.locator.len() > MAX_LOCATOR_HASHES {
            return Err(Error::invalid_payload(format!(
                "locator of {} hashes exceeds maximum {MAX_LOCATOR_HASHES}",
                self.locator.len()
            )));
        }
        let mut buf = BytesMut::with_capacity(4 + 9 + (self.locator.len() + 1) * 32);
        buf.put_u32_le(self.version);
        write_compact_size(&mut buf, self.locator.len() as u64);
        for hash in &self.locator {
            buf.put_slice(hash.as_bytes());
        }
        buf.put_slice(self.stop_hash.as_bytes());
        Ok(buf.freeze())
    }

    /// Decode the payload
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        ensure_remaining(&buf, 4, "getheaders version")?;
        let version = buf.get_u32_le();
        let count = read_compact_size(&mut buf)? as usize;
        if count > MAX_LOCATOR_HASHES {
            return Err(Error::invalid_payload(format!(
                "locator of {count} hashes exceeds maximum {MAX_LOCATOR_HASHES}"
            )));
        }
        let locator = (0..count)
            .map(|_| read_hash(&mut buf))
            .collect::<Result<Vec<_>>>()?;
        let stop_hash = read_hash(&mut buf)?;
        reject_trailing(&buf, "getheaders")?;
        Ok(Self {
            version,
            locator,
            stop_hash,
        })
    }
}

/// Encode a `headers` payload; each header is followed by a zero transaction count
pub fn encode_headers(headers: &[BlockHeader]) -> Result<Bytes> {
    if headers.len() > MAX_HEADERS_PER_MESSAGE {
        return Err(Error::invalid_payload(format!(
            "{} headers exceed maximum {MAX_HEADERS_PER_MESSAGE}",
            headers.len()
        )));
    }
    let mut buf = BytesMut::with_capacity(9 + headers.len() * (BLOCK_HEADER_SIZE + 1));
    write_compact_size(&mut buf, headers.len() as u64);
    for header in headers {
        buf.put_slice(&header.to_bytes());
        write_compact_size(&mut buf, 0);
    }
    Ok(buf.freeze())
}

/// Decode a `headers` payload
pub fn decode_headers(payload: &[u8]) -> Result<Vec<BlockHeader>> {
    let mut buf = payload;
    let count = read_compact_size(&mut buf)? as usize;
    if count > MAX_HEADERS_PER_MESSAGE {
        return Err(Error::invalid_payload(format!(
            "{count} headers exceed maximum {MAX_HEADERS_PER_MESSAGE}"
        )));
    }
    let mut headers = Vec::with_capacity(count);
    for _ in 0..count {
        let header = BlockHeader::read_from(&mut buf)
            .ok_or_else(|| Error::invalid_payload("truncated block header"))?;
        if read_compact_size(&mut buf)? != 0 {
            return Err(Error::invalid_payload("headers message carries transactions"));
        }
        headers.push(header);
    }
    reject_trailing(&buf, "headers")?;
    Ok(headers)
}

/// Encode a `ping` or `pong` nonce
pub fn encode_nonce(nonce: u64) -> Bytes {
    Bytes::copy_from_slice(&nonce.to_le_bytes())
}

/// Decode a `ping` or `pong` nonce; legacy pings carry none
pub fn decode_nonce(payload: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = payload.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

/// A `filterload` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterLoad {
    /// Filter bit field
    pub filter: Vec<u8>,
    /// Number of hash functions
    pub hash_function_count: u32,
    /// Seed tweak
    pub tweak: u32,
    /// Update flags
    pub flags: u8,
}

impl FilterLoad {
    /// Encode the payload
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.filter.len() + 18);
        write_var_bytes(&mut buf, &self.filter);
        buf.put_u32_le(self.hash_function_count);
        buf.put_u32_le(self.tweak);
        buf.put_u8(self.flags);
        buf.freeze()
    }

    /// Decode the payload
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        let filter = read_var_bytes(&mut buf)?;
        ensure_remaining(&buf, 9, "filterload parameters")?;
        let hash_function_count = buf.get_u32_le();
        let tweak = buf.get_u32_le();
        let flags = buf.get_u8();
        reject_trailing(&buf, "filterload")?;
        Ok(Self {
            filter,
            hash_function_count,
            tweak,
            flags,
        })
    }
}

/// Size of a network address as carried in `version`
pub const VERSION_ADDRESS_SIZE: usize = 26;

/// A `version` announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    /// Protocol version of the sender
    pub version: u32,
    /// Service bits
    pub services: u64,
    /// Sender's clock, seconds since the Unix epoch
    pub timestamp: i64,
    /// Receiver address as seen by the sender
    pub receiver: [u8; VERSION_ADDRESS_SIZE],
    /// Sender address
    pub sender: [u8; VERSION_ADDRESS_SIZE],
    /// Connection nonce
    pub nonce: u64,
    /// Free-form client name
    pub user_agent: String,
    /// Sender's best height
    pub start_height: u32,
    /// Whether the sender wants transaction relay; absent means yes
    pub relay: bool,
}

impl VersionMessage {
    /// Encode the payload
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(86 + self.user_agent.len());
        buf.put_u32_le(self.version);
        buf.put_u64_le(self.services);
        buf.put_i64_le(self.timestamp);
        buf.put_slice(&self.receiver);
        buf.put_slice(&self.sender);
        buf.put_u64_le(self.nonce);
        write_var_bytes(&mut buf, self.user_agent.as_bytes());
        buf.put_u32_le(self.start_height);
        buf.put_u8(u8::from(self.relay));
        buf.freeze()
    }

    /// Decode the payload
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        ensure_remaining(&buf, 20 + 2 * VERSION_ADDRESS_SIZE + 8, "version header")?;
        let version = buf.get_u32_le();
        let services = buf.get_u64_le();
        let timestamp = buf.get_i64_le();
        let mut receiver = [0u8; VERSION_ADDRESS_SIZE];
        buf.copy_to_slice(&mut receiver);
        let mut sender = [0u8; VERSION_ADDRESS_SIZE];
        buf.copy_to_slice(&mut sender);
        let nonce = buf.get_u64_le();
        let user_agent = String::from_utf8_lossy(&read_var_bytes(&mut buf)?).into_owned();
        ensure_remaining(&buf, 4, "version start height")?;
        let start_height = buf.get_u32_le();
        let relay = !buf.has_remaining() || buf.get_u8() != 0;
        reject_trailing(&buf, "version")?;
        Ok(Self {
            version,
            services,
            timestamp,
            receiver,
            sender,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Difficulty;
    use pretty_assertions::assert_eq;

    fn header(nonce: u32) -> BlockHeader {
        BlockHeader {
            version: 1,
            previous_block_hash: Sha256Hash::digest(b"parent"),
            merkle_root: Sha256Hash::digest(b"merkle"),
            timestamp: 1_600_000_000,
            difficulty: Difficulty::BASE_DIFFICULTY,
            nonce,
        }
    }

    #[test]
    fn test_inventory_roundtrip() {
        let items = vec![
            InventoryItem::transaction(Sha256Hash::digest(b"a")),
            InventoryItem::block(Sha256Hash::digest(b"b")),
        ];
        let payload = encode_inventory(&items).unwrap();
        assert_eq!(payload.len(), 1 + 2 * INVENTORY_ITEM_SIZE);
        assert_eq!(decode_inventory(&payload).unwrap(), items);
    }

    #[test]
    fn test_inventory_limits() {
        let items = vec![InventoryItem::transaction(Sha256Hash::EMPTY); MAX_INVENTORY_ITEMS + 1];
        assert!(encode_inventory(&items).is_err());

        let mut payload = Vec::new();
        write_compact_size(&mut payload, (MAX_INVENTORY_ITEMS + 1) as u64);
        assert!(decode_inventory(&payload).is_err());
    }

    #[test]
    fn test_inventory_truncated() {
        let payload = encode_inventory(&[InventoryItem::block(Sha256Hash::EMPTY)]).unwrap();
        assert!(decode_inventory(&payload[..payload.len() - 1]).is_err());
    }

    #[test]
    fn test_getheaders_roundtrip() {
        let request = GetHeaders::new(vec![Sha256Hash::digest(b"tip"), Sha256Hash::digest(b"genesis")]);
        let payload = request.encode().unwrap();
        assert_eq!(payload.len(), 4 + 1 + 3 * 32);
        assert_eq!(&payload[..4], &PROTOCOL_VERSION.to_le_bytes());
        assert_eq!(GetHeaders::decode(&payload).unwrap(), request);
    }

    #[test]
    fn test_getheaders_locator_limit() {
        let request = GetHeaders::new(vec![Sha256Hash::EMPTY; MAX_LOCATOR_HASHES + 1]);
        assert!(request.encode().is_err());
    }

    #[test]
    fn test_headers_roundtrip() {
        let headers = vec![header(1), header(2)];
        let payload = encode_headers(&headers).unwrap();
        assert_eq!(payload.len(), 1 + 2 * (BLOCK_HEADER_SIZE + 1));
        assert_eq!(decode_headers(&payload).unwrap(), headers);
    }

    #[test]
    fn test_headers_with_transactions_rejected() {
        let mut payload = encode_headers(&[header(1)]).unwrap().to_vec();
        let last = payload.len() - 1;
        payload[last] = 1;
        assert!(decode_headers(&payload).is_err());
    }

    #[test]
    fn test_nonce() {
        assert_eq!(decode_nonce(&encode_nonce(0xDEAD_BEEF)), Some(0xDEAD_BEEF));
        assert_eq!(decode_nonce(&[]), None);
    }

    #[test]
    fn test_filterload_roundtrip() {
        let load = FilterLoad {
            filter: vec![0b1010_0000, 0xFF, 0x01],
            hash_function_count: 11,
            tweak: 5,
            flags: 1,
        };
        let payload = load.encode();
        assert_eq!(FilterLoad::decode(&payload).unwrap(), load);
        assert!(FilterLoad::decode(&payload[..payload.len() - 1]).is_err());
    }

    fn version_message() -> VersionMessage {
        VersionMessage {
            version: PROTOCOL_VERSION,
            services: 1,
            timestamp: 1_700_000_005,
            receiver: [0u8; VERSION_ADDRESS_SIZE],
            sender: [1u8; VERSION_ADDRESS_SIZE],
            nonce: 42,
            user_agent: "/chainsync:0.3.0/".to_string(),
            start_height: 812_000,
            relay: false,
        }
    }

    #[test]
    fn test_version_roundtrip() {
        let version = version_message();
        assert_eq!(VersionMessage::decode(&version.encode()).unwrap(), version);
    }

    #[test]
    fn test_version_without_relay_flag_defaults_to_relay() {
        let encoded = version_message().encode();
        let decoded = VersionMessage::decode(&encoded[..encoded.len() - 1]).unwrap();
        assert!(decoded.relay);
        assert_eq!(decoded.start_height, 812_000);
    }

    #[test]
    fn test_truncated_version_is_rejected() {
        let encoded = version_message().encode();
        assert!(VersionMessage::decode(&encoded[..40]).is_err());
    }
}
