//! In-memory persistence
//!
//! Implements the session factory, the session and the block store over a
//! single `parking_lot::RwLock`. A failure switch makes every operation
//! return [`StorageError::Unavailable`] so callers' fallback paths can be
//! exercised.

use super::{
    Block, BlockStore, DatabaseSession, DatabaseSessionFactory, StorageError, StorageResult,
    StoredBlockHeader,
};
use crate::core::{BlockHeader, BlockId, ChainWork, Sha256Hash, Transaction, TransactionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct MemoryState {
    /// Headers indexed by `BlockId`
    headers: Vec<StoredBlockHeader>,
    by_hash: HashMap<Sha256Hash, BlockId>,
    head: Option<BlockId>,
    /// Best chain, indexed by height
    head_chain: Vec<BlockId>,
    /// Transactions indexed by `TransactionId`
    transactions: Vec<(Sha256Hash, Transaction)>,
    unconfirmed: Vec<TransactionId>,
    blocks: HashMap<Sha256Hash, Block>,
}

impl MemoryState {
    fn header(&self, id: BlockId) -> Option<&StoredBlockHeader> {
        self.headers.get(id.0 as usize)
    }

    fn rebuild_head_chain(&mut self, head: BlockId) -> StorageResult<()> {
        let tip = self
            .header(head)
            .ok_or_else(|| StorageError::not_found(format!("block {head}")))?;
        let mut chain = vec![head; tip.height as usize + 1];
        let mut cursor = tip.clone();
        while cursor.height > 0 {
            let parent_id = self
                .by_hash
                .get(&cursor.header.previous_block_hash)
                .copied()
                .ok_or_else(|| StorageError::constraint(format!("orphaned block {}", cursor.hash)))?;
            chain[cursor.height as usize - 1] = parent_id;
            cursor = self
                .header(parent_id)
                .cloned()
                .ok_or_else(|| StorageError::not_found(format!("block {parent_id}")))?;
        }
        self.head = Some(head);
        self.head_chain = chain;
        Ok(())
    }
}

/// Shared in-memory database
///
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    state: Arc<RwLock<MemoryState>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryDatabase {
    /// Create an empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail, or recover
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Whether failure injection is active
    pub fn is_failing(&self) -> bool {
        self.failing.load(Ordering::SeqCst)
    }

    /// Number of stored headers across all chains
    pub fn header_count(&self) -> usize {
        self.state.read().headers.len()
    }

    /// Add an unconfirmed transaction, returning its identifier
    pub fn add_unconfirmed_transaction(&self, transaction: Transaction) -> TransactionId {
        let mut state = self.state.write();
        let id = TransactionId(state.transactions.len() as u64);
        state.transactions.push((transaction.hash(), transaction));
        state.unconfirmed.push(id);
        id
    }

    /// Remove a transaction from the unconfirmed set
    pub fn confirm_transaction(&self, id: TransactionId) {
        self.state.write().unconfirmed.retain(|candidate| *candidate != id);
    }

    /// Store a full block for the block store
    pub fn insert_block(&self, block: Block) {
        self.state.write().blocks.insert(block.hash(), block);
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.is_failing() {
            return Err(StorageError::unavailable("failure injected"));
        }
        Ok(())
    }
}

impl DatabaseSessionFactory for InMemoryDatabase {
    fn new_session(&self) -> StorageResult<Box<dyn DatabaseSession>> {
        self.check_available()?;
        Ok(Box::new(InMemorySession {
            database: self.clone(),
        }))
    }
}

impl BlockStore for InMemoryDatabase {
    fn get_block(&self, hash: &Sha256Hash, _height_hint: Option<u64>) -> Option<Block> {
        if self.is_failing() {
            return None;
        }
        self.state.read().blocks.get(hash).cloned()
    }
}

/// A session over an [`InMemoryDatabase`]
#[derive(Debug)]
pub struct InMemorySession {
    database: InMemoryDatabase,
}

impl DatabaseSession for InMemorySession {
    fn head_block_header(&self) -> StorageResult<Option<StoredBlockHeader>> {
        self.database.check_available()?;
        let state = self.database.state.read();
        Ok(state.head.and_then(|id| state.header(id)).cloned())
    }

    fn block_header_by_hash(&self, hash: &Sha256Hash) -> StorageResult<Option<StoredBlockHeader>> {
        self.database.check_available()?;
        let state = self.database.state.read();
        Ok(state.by_hash.get(hash).and_then(|id| state.header(*id)).cloned())
    }

    fn block_header_at_height(&self, height: u64) -> StorageResult<Option<StoredBlockHeader>> {
        self.database.check_available()?;
        let state = self.database.state.read();
        Ok(state
            .head_chain
            .get(height as usize)
            .and_then(|id| state.header(*id))
            .cloned())
    }

    fn store_block_header(&mut self, header: &BlockHeader) -> StorageResult<StoredBlockHeader> {
        self.database.check_available()?;
        let hash = header.hash();
        let mut state = self.database.state.write();
        if let Some(existing) = state.by_hash.get(&hash).and_then(|id| state.header(*id)) {
            return Ok(existing.clone());
        }

        let (height, parent_work) = if header.is_genesis() {
            (0, ChainWork::ZERO)
        } else {
            let parent = state
                .by_hash
                .get(&header.previous_block_hash)
                .and_then(|id| state.header(*id))
                .ok_or_else(|| {
                    StorageError::not_found(format!("parent {} of {hash}", header.previous_block_hash))
                })?;
            (parent.height + 1, parent.chain_work)
        };

        let stored = StoredBlockHeader {
            id: BlockId(state.headers.len() as u64),
            hash,
            height,
            header: header.clone(),
            chain_work: parent_work + ChainWork::from_difficulty(header.difficulty),
        };
        state.by_hash.insert(hash, stored.id);
        state.headers.push(stored.clone());
        Ok(stored)
    }

    fn set_head_block(&mut self, id: BlockId) -> StorageResult<()> {
        self.database.check_available()?;
        self.database.state.write().rebuild_head_chain(id)
    }

    fn unconfirmed_transaction_ids(&self) -> StorageResult<Vec<TransactionId>> {
        self.database.check_available()?;
        Ok(self.database.state.read().unconfirmed.clone())
    }

    fn transaction(&self, id: TransactionId) -> StorageResult<Option<Transaction>> {
        self.database.check_available()?;
        let state = self.database.state.read();
        Ok(state.transactions.get(id.0 as usize).map(|(_, tx)| tx.clone()))
    }

    fn transaction_hash(&self, id: TransactionId) -> StorageResult<Option<Sha256Hash>> {
        self.database.check_available()?;
        let state = self.database.state.read();
        Ok(state.transactions.get(id.0 as usize).map(|(hash, _)| *hash))
    }
}
