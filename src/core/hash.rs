//! Double-SHA-256 digests

use crate::core::constants::HASH_SIZE;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Double-SHA-256 of `data`, in the byte order the hasher produces it
pub fn sha256d(data: &[u8]) -> [u8; HASH_SIZE] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// A 32-byte digest identifying a block or transaction
///
/// Bytes are kept in internal (hasher output) order. Display and hex
/// conversion use the conventional reversed order, matching how block and
/// transaction hashes are usually printed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Sha256Hash([u8; HASH_SIZE]);

impl Sha256Hash {
    /// The all-zero hash (e.g. the genesis block's parent)
    pub const EMPTY: Sha256Hash = Sha256Hash([0u8; HASH_SIZE]);

    /// Create a hash from internal-order bytes
    pub const fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a hash from a byte slice, `None` unless it is exactly 32 bytes
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; HASH_SIZE] = slice.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Hash `data` with double-SHA-256
    pub fn digest(data: &[u8]) -> Self {
        Self(sha256d(data))
    }

    /// Get the internal-order bytes
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Whether this is the all-zero hash
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; HASH_SIZE]
    }

    /// Convert to the conventional (byte-reversed) hex string
    pub fn to_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }

    /// Parse the conventional (byte-reversed) hex string
    pub fn from_hex(hex: &str) -> Option<Self> {
        let mut bytes: [u8; HASH_SIZE] = hex::decode(hex).ok()?.try_into().ok()?;
        bytes.reverse();
        Some(Self(bytes))
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256Hash({})", self.to_hex())
    }
}

impl From<[u8; HASH_SIZE]> for Sha256Hash {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Sha256Hash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Sha256Hash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).ok_or_else(|| serde::de::Error::custom("expected 32-byte hex hash"))
    }
}
