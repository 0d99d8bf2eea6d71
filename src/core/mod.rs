//! Core types and structures for the sync core
//!
//! This module contains the fundamental value types used throughout the crate,
//! including hashes, chain work, block headers, transactions and inventory
//! references.

mod chain_work;
mod difficulty;
mod hash;
mod header;
mod inventory;
mod transaction;

pub use chain_work::ChainWork;
pub use difficulty::Difficulty;
pub use hash::{Sha256Hash, sha256d};
pub use header::{BlockHeader, BlockId, MedianBlockTime};
pub use inventory::{InventoryItem, InventoryKind};
pub use transaction::{
    Transaction, TransactionId, TransactionInput, TransactionOutput, TransactionOutputId,
    TransactionOutputIdentifier, UnspentTransactionOutput,
};

/// Constants for the chain model
pub mod constants {
    /// Size of a double-SHA-256 digest in bytes
    pub const HASH_SIZE: usize = 32;

    /// Size of a serialized chain work value in bytes
    pub const CHAIN_WORK_SIZE: usize = 32;

    /// Size of a serialized block header in bytes
    pub const BLOCK_HEADER_SIZE: usize = 80;

    /// Size of a serialized inventory item in bytes
    pub const INVENTORY_ITEM_SIZE: usize = 36;

    /// Number of trailing headers used for the median time past
    pub const MEDIAN_TIME_SPAN: usize = 11;
}

#[cfg(test)]
mod tests {
    use super::constants::*;

    #[test]
    fn test_constants() {
        assert_eq!(HASH_SIZE, 32);
        assert_eq!(CHAIN_WORK_SIZE, 32);
        assert_eq!(BLOCK_HEADER_SIZE, 80);
        assert_eq!(INVENTORY_ITEM_SIZE, 4 + HASH_SIZE);
        assert_eq!(MEDIAN_TIME_SPAN, 11);
    }
}

#[cfg(test)]
mod tests_property;
