//! Inventory references exchanged in `inv`, `getdata` and `notfound` messages

use crate::core::Sha256Hash;
use crate::core::constants::INVENTORY_ITEM_SIZE;
use bytes::{Buf, BufMut};
use std::fmt;

/// The kind of object an inventory item points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InventoryKind {
    /// Data of this kind may be ignored
    Error,
    /// A transaction
    Transaction,
    /// A full block
    Block,
    /// A block filtered through the peer's bloom filter
    FilteredBlock,
    /// A compact block
    CompactBlock,
    /// A kind this node does not understand
    Unknown(u32),
}

impl InventoryKind {
    /// Parse from the wire value
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Error,
            1 => Self::Transaction,
            2 => Self::Block,
            3 => Self::FilteredBlock,
            4 => Self::CompactBlock,
            other => Self::Unknown(other),
        }
    }

    /// The wire value
    pub fn to_u32(self) -> u32 {
        match self {
            Self::Error => 0,
            Self::Transaction => 1,
            Self::Block => 2,
            Self::FilteredBlock => 3,
            Self::CompactBlock => 4,
            Self::Unknown(other) => other,
        }
    }
}

/// A typed pointer to a block or transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InventoryItem {
    /// What the hash refers to
    pub kind: InventoryKind,
    /// The object's hash
    pub hash: Sha256Hash,
}

impl InventoryItem {
    /// Create a new inventory item
    pub fn new(kind: InventoryKind, hash: Sha256Hash) -> Self {
        Self { kind, hash }
    }

    /// Inventory item for a transaction
    pub fn transaction(hash: Sha256Hash) -> Self {
        Self::new(InventoryKind::Transaction, hash)
    }

    /// Inventory item for a block
    pub fn block(hash: Sha256Hash) -> Self {
        Self::new(InventoryKind::Block, hash)
    }

    /// Serialize to 36 bytes: little-endian kind followed by the digest
    pub fn to_bytes(&self) -> [u8; INVENTORY_ITEM_SIZE] {
        let mut bytes = [0u8; INVENTORY_ITEM_SIZE];
        let mut out = &mut bytes[..];
        self.write_to(&mut out);
        bytes
    }

    /// Append the wire form to `buf`
    pub fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.kind.to_u32());
        buf.put_slice(self.hash.as_bytes());
    }

    /// Read one item from the front of `buf`, `None` if fewer than 36 bytes remain
    pub fn read_from(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < INVENTORY_ITEM_SIZE {
            return None;
        }
        let kind = InventoryKind::from_u32(buf.get_u32_le());
        let mut hash = [0u8; 32];
        buf.copy_to_slice(&mut hash);
        Some(Self::new(kind, Sha256Hash::from_bytes(hash)))
    }
}

impl fmt::Display for InventoryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.kind, self.hash)
    }
}
