//! Tiered validation cache
//!
//! A validation unit (one block, one transaction batch) writes into its own
//! [`LocalDatabaseManagerCache`]; reads fall through to the shared
//! [`DatabaseManagerCache`]. Nothing a unit writes is visible to other units
//! until [`DatabaseManagerCache::commit_local_database_manager_cache`] merges
//! it, last writer wins. The cache is an optimization: a miss at both tiers
//! means "ask persistence".

mod utxo;

pub use utxo::UnspentTransactionOutputCache;

use crate::core::{
    BlockId, Sha256Hash, Transaction, TransactionId, TransactionOutputId,
    TransactionOutputIdentifier, UnspentTransactionOutput,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Identifier of a blockchain segment (a run of blocks without forks)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockchainSegmentId(pub u64);

/// Identifier of a known address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressId(pub u64);

/// Entries of one cache tier
#[derive(Debug, Clone, Default)]
struct CacheEntries {
    transactions: HashMap<TransactionId, Transaction>,
    transaction_ids: HashMap<Sha256Hash, TransactionId>,
    transaction_output_ids: HashMap<TransactionOutputIdentifier, TransactionOutputId>,
    blockchain_segment_ids: HashMap<BlockId, BlockchainSegmentId>,
    address_ids: HashMap<String, AddressId>,
    block_heights: HashMap<BlockId, u64>,
}

fn merge<K: Eq + Hash, V>(target: &mut HashMap<K, V>, source: HashMap<K, V>) {
    target.extend(source);
}

impl CacheEntries {
    fn merge_from(&mut self, other: CacheEntries) {
        merge(&mut self.transactions, other.transactions);
        merge(&mut self.transaction_ids, other.transaction_ids);
        merge(&mut self.transaction_output_ids, other.transaction_output_ids);
        merge(&mut self.blockchain_segment_ids, other.blockchain_segment_ids);
        merge(&mut self.address_ids, other.address_ids);
        merge(&mut self.block_heights, other.block_heights);
    }

    fn counts(&self) -> CacheEntryCounts {
        CacheEntryCounts {
            transactions: self.transactions.len(),
            transaction_ids: self.transaction_ids.len(),
            transaction_output_ids: self.transaction_output_ids.len(),
            blockchain_segment_ids: self.blockchain_segment_ids.len(),
            address_ids: self.address_ids.len(),
            block_heights: self.block_heights.len(),
            unspent_transaction_outputs: 0,
        }
    }

    fn clear(&mut self) {
        *self = CacheEntries::default();
    }

    fn invalidate_transaction(&mut self, id: TransactionId, hash: Option<Sha256Hash>) {
        let cached = self.transactions.remove(&id).map(|tx| tx.hash());
        self.transaction_ids.retain(|_, candidate| *candidate != id);
        if let Some(hash) = hash.or(cached) {
            self.transaction_ids.remove(&hash);
            self.transaction_output_ids
                .retain(|outpoint, _| outpoint.transaction_hash != hash);
        }
    }
}

/// Resident entry counts per key family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntryCounts {
    /// Transaction bodies
    pub transactions: usize,
    /// Transaction hash to id
    pub transaction_ids: usize,
    /// Outpoint to output id
    pub transaction_output_ids: usize,
    /// Block to segment
    pub blockchain_segment_ids: usize,
    /// Address to id
    pub address_ids: usize,
    /// Block to height
    pub block_heights: usize,
    /// Unspent outputs
    pub unspent_transaction_outputs: usize,
}

impl CacheEntryCounts {
    /// Sum over every family
    pub fn total(&self) -> usize {
        self.transactions
            + self.transaction_ids
            + self.transaction_output_ids
            + self.blockchain_segment_ids
            + self.address_ids
            + self.block_heights
            + self.unspent_transaction_outputs
    }
}

#[derive(Debug)]
struct MasterState {
    entries: CacheEntries,
    utxos: UnspentTransactionOutputCache,
}

/// The shared master tier
#[derive(Debug)]
pub struct DatabaseManagerCache {
    state: RwLock<MasterState>,
    max_cached_utxo_count: usize,
    closed: AtomicBool,
}

impl DatabaseManagerCache {
    /// Create a master cache whose UTXO views hold at most `max_cached_utxo_count` outputs
    pub fn new(max_cached_utxo_count: usize) -> Self {
        Self {
            state: RwLock::new(MasterState {
                entries: CacheEntries::default(),
                utxos: UnspentTransactionOutputCache::new(max_cached_utxo_count),
            }),
            max_cached_utxo_count,
            closed: AtomicBool::new(false),
        }
    }

    /// Bound shared by every UTXO view of this cache
    pub fn max_cached_utxo_count(&self) -> usize {
        self.max_cached_utxo_count
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// A fresh, empty UTXO view with this cache's bound
    pub fn new_unspent_transaction_output_cache(&self) -> UnspentTransactionOutputCache {
        UnspentTransactionOutputCache::new(self.max_cached_utxo_count)
    }

    fn read<T>(&self, f: impl FnOnce(&MasterState) -> Option<T>) -> Option<T> {
        if self.is_closed() {
            return None;
        }
        f(&self.state.read())
    }

    /// Cached transaction body
    pub fn get_transaction(&self, id: TransactionId) -> Option<Transaction> {
        self.read(|state| state.entries.transactions.get(&id).cloned())
    }

    /// Cached transaction id for a hash
    pub fn get_transaction_id(&self, hash: &Sha256Hash) -> Option<TransactionId> {
        self.read(|state| state.entries.transaction_ids.get(hash).copied())
    }

    /// Cached output id for an outpoint
    pub fn get_transaction_output_id(
        &self,
        outpoint: &TransactionOutputIdentifier,
    ) -> Option<TransactionOutputId> {
        self.read(|state| state.entries.transaction_output_ids.get(outpoint).copied())
    }

    /// Cached segment of a block
    pub fn get_blockchain_segment_id(&self, block: BlockId) -> Option<BlockchainSegmentId> {
        self.read(|state| state.entries.blockchain_segment_ids.get(&block).copied())
    }

    /// Cached id of an address
    pub fn get_address_id(&self, address: &str) -> Option<AddressId> {
        self.read(|state| state.entries.address_ids.get(address).copied())
    }

    /// Cached height of a block
    pub fn get_block_height(&self, block: BlockId) -> Option<u64> {
        self.read(|state| state.entries.block_heights.get(&block).copied())
    }

    /// Cached unspent output
    pub fn get_unspent_transaction_output(
        &self,
        outpoint: &TransactionOutputIdentifier,
    ) -> Option<UnspentTransactionOutput> {
        self.read(|state| state.utxos.get(outpoint).cloned())
    }

    /// Merge a finished unit's local cache into the master, last writer wins
    ///
    /// The merge happens under one write lock, so readers see the master
    /// either entirely before or entirely after it.
    pub fn commit_local_database_manager_cache(&self, local: LocalDatabaseManagerCache) {
        if self.is_closed() {
            return;
        }
        let LocalDatabaseManagerCache { entries, utxos, .. } = local;
        let mut state = self.state.write();
        state.entries.merge_from(entries);
        utxos.commit_into(&mut state.utxos);
        debug!(resident = state.entries.counts().total(), "Merged local cache");
    }

    /// Flush point for the master tier
    ///
    /// Returns the resident counts so the caller can sync persistence.
    pub fn commit(&self) -> CacheEntryCounts {
        let counts = self.entry_counts();
        info!(
            transactions = counts.transactions,
            transaction_ids = counts.transaction_ids,
            output_ids = counts.transaction_output_ids,
            utxos = counts.unspent_transaction_outputs,
            "Committed master cache"
        );
        counts
    }

    /// Resident entry counts
    pub fn entry_counts(&self) -> CacheEntryCounts {
        if self.is_closed() {
            return CacheEntryCounts::default();
        }
        let state = self.state.read();
        CacheEntryCounts {
            unspent_transaction_outputs: state.utxos.len(),
            ..state.entries.counts()
        }
    }

    /// Remove a transaction from every family that references it
    pub fn invalidate_transaction(&self, id: TransactionId) {
        if self.is_closed() {
            return;
        }
        let mut state = self.state.write();
        let hash = state.entries.transactions.get(&id).map(Transaction::hash).or_else(|| {
            state
                .entries
                .transaction_ids
                .iter()
                .find(|(_, candidate)| **candidate == id)
                .map(|(hash, _)| *hash)
        });
        state.entries.invalidate_transaction(id, hash);
        if let Some(hash) = hash {
            state.utxos.remove_transaction(&hash);
        }
    }

    /// Release every entry; later reads miss and commits are ignored
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.write();
        state.entries.clear();
        state.utxos.clear();
        debug!("Closed master cache");
    }
}

/// A validation unit's private tier
///
/// Owned by exactly one unit; reads fall through to the master.
#[derive(Debug)]
pub struct LocalDatabaseManagerCache {
    master: Arc<DatabaseManagerCache>,
    entries: CacheEntries,
    utxos: UnspentTransactionOutputCache,
}

impl LocalDatabaseManagerCache {
    /// Create an empty local tier over `master`
    pub fn new(master: Arc<DatabaseManagerCache>) -> Self {
        let utxos = master.new_unspent_transaction_output_cache();
        Self {
            master,
            entries: CacheEntries::default(),
            utxos,
        }
    }

    /// Cache a transaction body, indexing its hash too
    pub fn cache_transaction(&mut self, id: TransactionId, transaction: Transaction) {
        self.entries.transaction_ids.insert(transaction.hash(), id);
        self.entries.transactions.insert(id, transaction);
    }

    /// Cache a hash to id mapping
    pub fn cache_transaction_id(&mut self, hash: Sha256Hash, id: TransactionId) {
        self.entries.transaction_ids.insert(hash, id);
    }

    /// Cache an outpoint to output id mapping
    pub fn cache_transaction_output_id(
        &mut self,
        outpoint: TransactionOutputIdentifier,
        id: TransactionOutputId,
    ) {
        self.entries.transaction_output_ids.insert(outpoint, id);
    }

    /// Cache a block's segment
    pub fn cache_blockchain_segment_id(&mut self, block: BlockId, segment: BlockchainSegmentId) {
        self.entries.blockchain_segment_ids.insert(block, segment);
    }

    /// Cache an address id
    pub fn cache_address_id(&mut self, address: impl Into<String>, id: AddressId) {
        self.entries.address_ids.insert(address.into(), id);
    }

    /// Cache a block's height
    pub fn cache_block_height(&mut self, block: BlockId, height: u64) {
        self.entries.block_heights.insert(block, height);
    }

    /// Cache an unspent output
    pub fn cache_unspent_transaction_output(
        &mut self,
        outpoint: TransactionOutputIdentifier,
        output: UnspentTransactionOutput,
    ) {
        self.utxos.insert(outpoint, output);
    }

    /// Record a spend; the outpoint reads as missing in this unit from now on
    pub fn spend_transaction_output(&mut self, outpoint: TransactionOutputIdentifier) {
        self.utxos.mark_spent(outpoint);
    }

    /// Transaction body, local then master
    pub fn get_transaction(&self, id: TransactionId) -> Option<Transaction> {
        self.entries
            .transactions
            .get(&id)
            .cloned()
            .or_else(|| self.master.get_transaction(id))
    }

    /// Transaction id for a hash, local then master
    pub fn get_transaction_id(&self, hash: &Sha256Hash) -> Option<TransactionId> {
        self.entries
            .transaction_ids
            .get(hash)
            .copied()
            .or_else(|| self.master.get_transaction_id(hash))
    }

    /// Output id for an outpoint, local then master
    pub fn get_transaction_output_id(
        &self,
        outpoint: &TransactionOutputIdentifier,
    ) -> Option<TransactionOutputId> {
        self.entries
            .transaction_output_ids
            .get(outpoint)
            .copied()
            .or_else(|| self.master.get_transaction_output_id(outpoint))
    }

    /// Segment of a block, local then master
    pub fn get_blockchain_segment_id(&self, block: BlockId) -> Option<BlockchainSegmentId> {
        self.entries
            .blockchain_segment_ids
            .get(&block)
            .copied()
            .or_else(|| self.master.get_blockchain_segment_id(block))
    }

    /// Address id, local then master
    pub fn get_address_id(&self, address: &str) -> Option<AddressId> {
        self.entries
            .address_ids
            .get(address)
            .copied()
            .or_else(|| self.master.get_address_id(address))
    }

    /// Block height, local then master
    pub fn get_block_height(&self, block: BlockId) -> Option<u64> {
        self.entries
            .block_heights
            .get(&block)
            .copied()
            .or_else(|| self.master.get_block_height(block))
    }

    /// Unspent output, local then master; spent in this unit reads as missing
    pub fn get_unspent_transaction_output(
        &self,
        outpoint: &TransactionOutputIdentifier,
    ) -> Option<UnspentTransactionOutput> {
        if self.utxos.is_spent(outpoint) {
            return None;
        }
        self.utxos
            .get(outpoint)
            .cloned()
            .or_else(|| self.master.get_unspent_transaction_output(outpoint))
    }

    /// Resident counts of this tier only
    pub fn entry_counts(&self) -> CacheEntryCounts {
        CacheEntryCounts {
            unspent_transaction_outputs: self.utxos.len(),
            ..self.entries.counts()
        }
    }
}
