//! Cumulative proof-of-work as a fixed-width 256-bit unsigned integer
//!
//! Chain work is the sum of per-header work along a chain and is the sole
//! arbiter between competing chains. The value is stored big-endian so the
//! derived lexicographic ordering on the bytes is exactly the numeric ordering.

use crate::core::Difficulty;
use crate::core::constants::CHAIN_WORK_SIZE;
use num_bigint::{BigInt, BigUint};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};

/// A 256-bit unsigned amount of cumulative work, big-endian
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ChainWork([u8; CHAIN_WORK_SIZE]);

impl ChainWork {
    /// No work
    pub const ZERO: ChainWork = ChainWork([0u8; CHAIN_WORK_SIZE]);

    /// The largest representable work (2^256 - 1)
    pub const MAX: ChainWork = ChainWork([0xFFu8; CHAIN_WORK_SIZE]);

    /// Create chain work from big-endian bytes
    pub const fn from_array(bytes: [u8; CHAIN_WORK_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create chain work from a big-endian buffer
    ///
    /// Returns `None` unless the buffer is exactly 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let array: [u8; CHAIN_WORK_SIZE] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Create chain work from an unsigned big integer
    ///
    /// Only the low 256 bits are kept; higher-order bytes are dropped.
    pub fn from_biguint(value: &BigUint) -> Self {
        let bytes = value.to_bytes_be();
        let mut array = [0u8; CHAIN_WORK_SIZE];
        if bytes.len() > CHAIN_WORK_SIZE {
            array.copy_from_slice(&bytes[bytes.len() - CHAIN_WORK_SIZE..]);
        } else {
            array[CHAIN_WORK_SIZE - bytes.len()..].copy_from_slice(&bytes);
        }
        Self(array)
    }

    /// Create chain work from a signed big integer, `None` when negative
    pub fn from_bigint(value: &BigInt) -> Option<Self> {
        value.to_biguint().map(|unsigned| Self::from_biguint(&unsigned))
    }

    /// The work contributed by a single header with the given difficulty
    pub fn from_difficulty(difficulty: Difficulty) -> Self {
        difficulty.work()
    }

    /// Get the big-endian bytes
    pub fn as_bytes(&self) -> &[u8; CHAIN_WORK_SIZE] {
        &self.0
    }

    /// Copy out the big-endian bytes
    pub fn to_bytes(&self) -> [u8; CHAIN_WORK_SIZE] {
        self.0
    }

    /// Convert to a big integer for arbitrary-precision arithmetic
    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    /// Whether no work has been accumulated
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; CHAIN_WORK_SIZE]
    }

    /// Add two amounts of work, propagating the carry from byte 31 to byte 0
    ///
    /// A carry out of the most significant byte is dropped: the sum wraps at
    /// 2^256. Real chain work is many orders of magnitude below that bound.
    pub fn wrapping_add(&self, other: &ChainWork) -> ChainWork {
        let mut result = [0u8; CHAIN_WORK_SIZE];
        let mut carry = 0u16;
        for i in (0..CHAIN_WORK_SIZE).rev() {
            let sum = self.0[i] as u16 + other.0[i] as u16 + carry;
            result[i] = sum as u8;
            carry = sum >> 8;
        }
        ChainWork(result)
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string
    pub fn from_hex(hex: &str) -> Option<Self> {
        let bytes = hex::decode(hex).ok()?;
        Self::from_bytes(&bytes)
    }
}

impl Add for ChainWork {
    type Output = ChainWork;

    fn add(self, rhs: ChainWork) -> ChainWork {
        self.wrapping_add(&rhs)
    }
}

impl AddAssign for ChainWork {
    fn add_assign(&mut self, rhs: ChainWork) {
        *self = self.wrapping_add(&rhs);
    }
}

impl fmt::Display for ChainWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ChainWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainWork({})", self.to_hex())
    }
}

impl Serialize for ChainWork {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChainWork {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).ok_or_else(|| serde::de::Error::custom("expected 32-byte hex"))
    }
}
