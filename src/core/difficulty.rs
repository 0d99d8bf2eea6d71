//! Compact difficulty encoding and per-header proof-of-work
//!
//! Only the decoding side lives here: turning a header's compact `bits` into
//! its target and the work it contributes. Retargeting is left to an external
//! algorithm driven through the difficulty context.

use crate::core::ChainWork;
use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A header's difficulty in compact ("nBits") form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Difficulty(pub u32);

impl Difficulty {
    /// The minimum difficulty (maximum target) of the main network
    pub const BASE_DIFFICULTY: Difficulty = Difficulty(0x1d00_ffff);

    /// Create a difficulty from compact bits
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Get the compact bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Decode the target
    ///
    /// Returns `None` for a negative or overflowing encoding.
    pub fn to_target(self) -> Option<BigUint> {
        let size = self.0 >> 24;
        let mut word = self.0 & 0x007f_ffff;
        if self.0 & 0x0080_0000 != 0 && word != 0 {
            return None;
        }

        let overflow = word != 0
            && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));
        if overflow {
            return None;
        }

        let target = if size <= 3 {
            word >>= 8 * (3 - size);
            BigUint::from(word)
        } else {
            BigUint::from(word) << (8 * (size - 3)) as usize
        };
        Some(target)
    }

    /// Encode a target in compact form
    pub fn from_target(target: &BigUint) -> Self {
        if target.is_zero() {
            return Self(0);
        }

        let mut size = target.to_bytes_be().len() as u32;
        let mut compact: u32 = if size <= 3 {
            let low = target.to_u32_digits().first().copied().unwrap_or(0);
            low << (8 * (3 - size))
        } else {
            let shifted: BigUint = target >> (8 * (size - 3)) as usize;
            shifted.to_u32_digits().first().copied().unwrap_or(0)
        };

        if compact & 0x0080_0000 != 0 {
            compact >>= 8;
            size += 1;
        }

        Self((size << 24) | (compact & 0x007f_ffff))
    }

    /// The expected number of hashes needed to meet this difficulty
    ///
    /// Computed as `2^256 / (target + 1)`. An invalid or zero target
    /// contributes no work.
    pub fn work(self) -> ChainWork {
        match self.to_target() {
            Some(target) if !target.is_zero() => {
                let numerator = BigUint::one() << 256usize;
                ChainWork::from_biguint(&(numerator / (target + BigUint::one())))
            }
            _ => ChainWork::ZERO,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl From<u32> for Difficulty {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}
