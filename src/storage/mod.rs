//! Persistence boundary
//!
//! The sync core reads and writes chain state through these traits. A
//! relational backend lives outside this crate; [`InMemoryDatabase`] backs the
//! binary and the tests.

mod memory;

pub use memory::InMemoryDatabase;

use crate::core::{BlockHeader, BlockId, ChainWork, Sha256Hash, Transaction, TransactionId};
use crate::error::{Error, Result};
use crate::protocol::encoding::{read_compact_size, write_compact_size};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Persistence errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend cannot be reached or refused the operation
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A referenced record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The write would violate a storage constraint
    #[error("constraint violated: {0}")]
    Constraint(String),
}

impl StorageError {
    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a constraint error
    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }
}

/// Result type for persistence operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A header as persisted, with its position and cumulative work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlockHeader {
    /// Persistence identifier
    pub id: BlockId,
    /// Header hash
    pub hash: Sha256Hash,
    /// Distance from genesis
    pub height: u64,
    /// The header itself
    pub header: BlockHeader,
    /// Cumulative work of the chain ending at this header
    pub chain_work: ChainWork,
}

/// One unit of persistence work
///
/// A session is opened per operation and dropped on every exit path.
pub trait DatabaseSession: Send {
    /// Header at the tip of the best chain, `None` before genesis is stored
    fn head_block_header(&self) -> StorageResult<Option<StoredBlockHeader>>;

    /// Header with the given hash on any chain
    fn block_header_by_hash(&self, hash: &Sha256Hash) -> StorageResult<Option<StoredBlockHeader>>;

    /// Header at `height` on the best chain
    fn block_header_at_height(&self, height: u64) -> StorageResult<Option<StoredBlockHeader>>;

    /// Persist a header, computing its height and chain work from its parent
    ///
    /// Storing an already-known header returns the existing record. The parent
    /// must already be stored unless the header is a genesis header.
    fn store_block_header(&mut self, header: &BlockHeader) -> StorageResult<StoredBlockHeader>;

    /// Make `id` the tip of the best chain
    fn set_head_block(&mut self, id: BlockId) -> StorageResult<()>;

    /// Identifiers of all unconfirmed transactions
    fn unconfirmed_transaction_ids(&self) -> StorageResult<Vec<TransactionId>>;

    /// Full transaction body
    fn transaction(&self, id: TransactionId) -> StorageResult<Option<Transaction>>;

    /// Transaction hash without loading the body
    fn transaction_hash(&self, id: TransactionId) -> StorageResult<Option<Sha256Hash>>;
}

/// Opens persistence sessions
pub trait DatabaseSessionFactory: Send + Sync {
    /// Open a new session
    fn new_session(&self) -> StorageResult<Box<dyn DatabaseSession>>;
}

/// A full block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block header
    pub header: BlockHeader,
    /// Transactions, coinbase first
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Block hash
    pub fn hash(&self) -> Sha256Hash {
        self.header.hash()
    }

    /// Serialize to the wire form
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_slice(&self.header.to_bytes());
        write_compact_size(&mut buf, self.transactions.len() as u64);
        for transaction in &self.transactions {
            transaction.write_to(&mut buf);
        }
        buf.freeze()
    }

    /// Deserialize from the wire form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut buf = bytes;
        let header = BlockHeader::read_from(&mut buf)
            .ok_or_else(|| Error::invalid_payload("truncated block header"))?;
        let count = read_compact_size(&mut buf)?;
        let mut transactions = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            transactions.push(Transaction::read_from(&mut buf)?);
        }
        Ok(Self {
            header,
            transactions,
        })
    }
}

/// Reader for full blocks kept outside the header database
pub trait BlockStore: Send + Sync {
    /// Load a block by hash; `None` when missing or truncated
    fn get_block(&self, hash: &Sha256Hash, height_hint: Option<u64>) -> Option<Block>;
}
