//! Block header type

use crate::core::constants::{BLOCK_HEADER_SIZE, MEDIAN_TIME_SPAN};
use crate::core::{Difficulty, Sha256Hash};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Persistence-assigned identifier of a stored block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An 80-byte block header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block version
    pub version: i32,
    /// Hash of the parent header
    pub previous_block_hash: Sha256Hash,
    /// Merkle root of the block's transactions
    pub merkle_root: Sha256Hash,
    /// Block timestamp in seconds since the epoch
    pub timestamp: u32,
    /// Compact difficulty
    pub difficulty: Difficulty,
    /// Proof-of-work nonce
    pub nonce: u32,
}

impl BlockHeader {
    /// Serialize to the 80-byte wire form
    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut bytes = [0u8; BLOCK_HEADER_SIZE];
        let mut out = &mut bytes[..];
        out.put_i32_le(self.version);
        out.put_slice(self.previous_block_hash.as_bytes());
        out.put_slice(self.merkle_root.as_bytes());
        out.put_u32_le(self.timestamp);
        out.put_u32_le(self.difficulty.bits());
        out.put_u32_le(self.nonce);
        bytes
    }

    /// Deserialize from a buffer holding exactly one header
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != BLOCK_HEADER_SIZE {
            return None;
        }
        let mut reader = bytes;
        Self::read_from(&mut reader)
    }

    /// Read one header from the front of `buf`, advancing it
    pub fn read_from(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < BLOCK_HEADER_SIZE {
            return None;
        }
        let version = buf.get_i32_le();
        let mut previous = [0u8; 32];
        buf.copy_to_slice(&mut previous);
        let mut merkle = [0u8; 32];
        buf.copy_to_slice(&mut merkle);
        let timestamp = buf.get_u32_le();
        let difficulty = Difficulty::from_bits(buf.get_u32_le());
        let nonce = buf.get_u32_le();
        Some(Self {
            version,
            previous_block_hash: Sha256Hash::from_bytes(previous),
            merkle_root: Sha256Hash::from_bytes(merkle),
            timestamp,
            difficulty,
            nonce,
        })
    }

    /// Compute the header's hash
    pub fn hash(&self) -> Sha256Hash {
        Sha256Hash::digest(&self.to_bytes())
    }

    /// Whether this header claims to be a genesis header
    pub fn is_genesis(&self) -> bool {
        self.previous_block_hash.is_empty()
    }
}

/// Median of the timestamps of a run of consecutive headers, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MedianBlockTime(pub u64);

impl MedianBlockTime {
    /// Compute the median of up to the last eleven timestamps
    ///
    /// Returns `None` for an empty slice.
    pub fn from_timestamps(timestamps: &[u32]) -> Option<Self> {
        let start = timestamps.len().saturating_sub(MEDIAN_TIME_SPAN);
        let mut window: Vec<u32> = timestamps[start..].to_vec();
        if window.is_empty() {
            return None;
        }
        window.sort_unstable();
        Some(Self(window[window.len() / 2] as u64))
    }

    /// Seconds since the epoch
    pub fn seconds(self) -> u64 {
        self.0
    }
}
