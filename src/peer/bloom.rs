//! Peer-installed bloom filters
//!
//! Light clients install a filter with `filterload` and only want to hear
//! about transactions that touch it. Hashing follows the usual scheme:
//! 32-bit murmur3 seeded with `n * 0xFBA4C795 + tweak` for the n-th hash
//! function.

use crate::core::Transaction;
use crate::error::{Error, Result};
use crate::protocol::payload::FilterLoad;
use std::f64::consts::LN_2;

/// Largest filter a peer may install, in bytes
pub const MAX_FILTER_BYTES: usize = 36_000;

/// Largest number of hash functions a peer may request
pub const MAX_HASH_FUNCTIONS: u32 = 50;

const SEED_MULTIPLIER: u32 = 0xFBA4_C795;

/// 32-bit murmur3
pub fn murmur3(seed: u32, data: &[u8]) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h1 = seed;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k1 = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k1 = 0u32;
        for (i, byte) in tail.iter().enumerate() {
            k1 ^= (*byte as u32) << (8 * i);
        }
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85eb_ca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2_ae35);
    h1 ^= h1 >> 16;
    h1
}

/// Data pushes of a script, in order
///
/// Parsing stops at the first truncated push.
pub fn script_pushes(script: &[u8]) -> Vec<&[u8]> {
    let mut pushes = Vec::new();
    let mut cursor = 0usize;
    while cursor < script.len() {
        let opcode = script[cursor];
        cursor += 1;
        let (length, width) = match opcode {
            0x01..=0x4b => (opcode as usize, 0),
            0x4c => match script.get(cursor) {
                Some(len) => (*len as usize, 1),
                None => break,
            },
            0x4d => match script.get(cursor..cursor + 2) {
                Some(len) => (u16::from_le_bytes([len[0], len[1]]) as usize, 2),
                None => break,
            },
            0x4e => match script.get(cursor..cursor + 4) {
                Some(len) => (u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize, 4),
                None => break,
            },
            _ => continue,
        };
        cursor += width;
        match script.get(cursor..cursor.saturating_add(length)) {
            Some(data) => pushes.push(data),
            None => break,
        }
        cursor += length;
    }
    pushes
}

/// A bloom filter installed by a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    hash_function_count: u32,
    tweak: u32,
    flags: u8,
}

impl BloomFilter {
    /// Create a filter from its raw parts, enforcing the protocol limits
    pub fn new(bits: Vec<u8>, hash_function_count: u32, tweak: u32, flags: u8) -> Result<Self> {
        if bits.len() > MAX_FILTER_BYTES {
            return Err(Error::invalid_payload(format!(
                "bloom filter of {} bytes exceeds maximum {MAX_FILTER_BYTES}",
                bits.len()
            )));
        }
        if hash_function_count > MAX_HASH_FUNCTIONS {
            return Err(Error::invalid_payload(format!(
                "{hash_function_count} hash functions exceed maximum {MAX_HASH_FUNCTIONS}"
            )));
        }
        Ok(Self {
            bits,
            hash_function_count,
            tweak,
            flags,
        })
    }

    /// Create an empty filter sized for `elements` entries at the given false positive rate
    pub fn for_elements(elements: usize, false_positive_rate: f64, tweak: u32) -> Self {
        let elements = elements.max(1) as f64;
        let size_bits = -elements * false_positive_rate.ln() / (LN_2 * LN_2);
        let size_bytes = ((size_bits / 8.0) as usize).clamp(1, MAX_FILTER_BYTES);
        let functions = ((size_bytes * 8) as f64 / elements * LN_2) as u32;
        Self {
            bits: vec![0u8; size_bytes],
            hash_function_count: functions.clamp(1, MAX_HASH_FUNCTIONS),
            tweak,
            flags: 0,
        }
    }

    /// Build from a `filterload` payload
    pub fn from_filter_load(load: FilterLoad) -> Result<Self> {
        Self::new(load.filter, load.hash_function_count, load.tweak, load.flags)
    }

    /// Convert back into a `filterload` payload
    pub fn to_filter_load(&self) -> FilterLoad {
        FilterLoad {
            filter: self.bits.clone(),
            hash_function_count: self.hash_function_count,
            tweak: self.tweak,
            flags: self.flags,
        }
    }

    /// Number of hash functions
    pub fn hash_function_count(&self) -> u32 {
        self.hash_function_count
    }

    /// Size of the bit field in bytes
    pub fn size_bytes(&self) -> usize {
        self.bits.len()
    }

    fn bit_index(&self, n: u32, data: &[u8]) -> usize {
        let seed = n.wrapping_mul(SEED_MULTIPLIER).wrapping_add(self.tweak);
        murmur3(seed, data) as usize % (self.bits.len() * 8)
    }

    /// Add `data` to the filter
    pub fn insert(&mut self, data: &[u8]) {
        if self.bits.is_empty() {
            return;
        }
        for n in 0..self.hash_function_count {
            let index = self.bit_index(n, data);
            self.bits[index >> 3] |= 1 << (index & 7);
        }
    }

    /// Whether `data` may have been added
    pub fn contains(&self, data: &[u8]) -> bool {
        if self.bits.is_empty() {
            return false;
        }
        (0..self.hash_function_count).all(|n| {
            let index = self.bit_index(n, data);
            self.bits[index >> 3] & (1 << (index & 7)) != 0
        })
    }

    /// Whether the transaction touches anything in the filter
    ///
    /// Checks the transaction hash, data pushes in output scripts, spent
    /// outpoints and data pushes in input scripts.
    pub fn matches_transaction(&self, transaction: &Transaction) -> bool {
        if self.contains(transaction.hash().as_bytes()) {
            return true;
        }
        let output_match = transaction
            .outputs
            .iter()
            .flat_map(|output| script_pushes(&output.locking_script))
            .any(|push| self.contains(push));
        if output_match {
            return true;
        }
        transaction.inputs.iter().any(|input| {
            self.contains(&input.previous_output.to_bytes())
                || script_pushes(&input.unlocking_script)
                    .into_iter()
                    .any(|push| self.contains(push))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Sha256Hash, TransactionInput, TransactionOutput, TransactionOutputIdentifier};

    #[test]
    fn test_murmur3_vectors() {
        assert_eq!(murmur3(0x0000_0000, &[]), 0x0000_0000);
        assert_eq!(murmur3(0xFBA4_C795, &[]), 0x6a39_6f08);
        assert_eq!(murmur3(0x0000_0000, &[0x00]), 0x514E_28B7);
        assert_eq!(murmur3(0xFBA4_C795, &[0x00]), 0xEA3F_0B17);
        assert_eq!(murmur3(0x0000_0000, &[0x21, 0x43, 0x65, 0x87]), 0xF55B_516B);
        assert_eq!(murmur3(0x5082_EDEE, &[0x21, 0x43, 0x65, 0x87]), 0x2362_F9DE);
    }

    #[test]
    fn test_script_pushes() {
        let script = [0x76, 0xa9, 0x02, 0xAA, 0xBB, 0x4c, 0x01, 0xCC, 0x88, 0xac];
        let pushes = script_pushes(&script);
        assert_eq!(pushes, vec![&[0xAA, 0xBB][..], &[0xCC][..]]);

        // Truncated push is dropped
        assert!(script_pushes(&[0x05, 0x01]).is_empty());
    }

    #[test]
    fn test_limits() {
        assert!(BloomFilter::new(vec![0; MAX_FILTER_BYTES + 1], 1, 0, 0).is_err());
        assert!(BloomFilter::new(vec![0; 8], MAX_HASH_FUNCTIONS + 1, 0, 0).is_err());
        assert!(BloomFilter::new(vec![0; MAX_FILTER_BYTES], MAX_HASH_FUNCTIONS, 0, 0).is_ok());
    }

    #[test]
    fn test_insert_contains() {
        let mut filter = BloomFilter::for_elements(10, 0.0001, 7);
        filter.insert(b"hello");
        assert!(filter.contains(b"hello"));
        assert!(!filter.contains(b"goodbye"));
    }

    #[test]
    fn test_empty_filter_matches_nothing() {
        let filter = BloomFilter::new(Vec::new(), 5, 0, 0).unwrap();
        assert!(!filter.contains(b"anything"));
    }

    fn transaction() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                previous_output: TransactionOutputIdentifier::new(Sha256Hash::digest(b"funding"), 1),
                unlocking_script: vec![0x03, 0x01, 0x02, 0x03],
                sequence: 0,
            }],
            outputs: vec![TransactionOutput {
                amount: 1_000,
                locking_script: vec![0x76, 0xa9, 0x04, 0xDE, 0xAD, 0xBE, 0xEF, 0x88, 0xac],
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn test_matches_transaction_parts() {
        let tx = transaction();

        let mut by_hash = BloomFilter::for_elements(100, 0.0001, 0);
        by_hash.insert(tx.hash().as_bytes());
        assert!(by_hash.matches_transaction(&tx));

        let mut by_output = BloomFilter::for_elements(100, 0.0001, 0);
        by_output.insert(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(by_output.matches_transaction(&tx));

        let mut by_outpoint = BloomFilter::for_elements(100, 0.0001, 0);
        by_outpoint.insert(&tx.inputs[0].previous_output.to_bytes());
        assert!(by_outpoint.matches_transaction(&tx));

        let mut by_input_push = BloomFilter::for_elements(100, 0.0001, 0);
        by_input_push.insert(&[0x01, 0x02, 0x03]);
        assert!(by_input_push.matches_transaction(&tx));

        let mut unrelated = BloomFilter::for_elements(100, 0.0001, 0);
        unrelated.insert(b"unrelated");
        assert!(!unrelated.matches_transaction(&tx));
    }

    #[test]
    fn test_filter_load_roundtrip() {
        let mut filter = BloomFilter::for_elements(3, 0.01, 99);
        filter.insert(b"x");
        let rebuilt = BloomFilter::from_filter_load(filter.to_filter_load()).unwrap();
        assert_eq!(rebuilt, filter);
    }
}
