//! Bounded view of unspent outputs
//!
//! Holds at most `max_count` outputs. When an insertion would exceed the
//! bound, the oldest-inserted resident output is evicted. Reads use `peek` so
//! they never reorder residents.
//!
//! Spends are recorded so that committing a worker's view into the master view
//! removes them there too. The spent set is not counted against the bound: it
//! grows with the spends of one validation unit and is released when the view
//! is committed.

use crate::core::{Sha256Hash, TransactionOutputIdentifier, UnspentTransactionOutput};
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;

/// A bounded outpoint to unspent-output map
#[derive(Debug)]
pub struct UnspentTransactionOutputCache {
    max_count: usize,
    outputs: LruCache<TransactionOutputIdentifier, UnspentTransactionOutput>,
    spent: HashSet<TransactionOutputIdentifier>,
    evicted: u64,
}

impl UnspentTransactionOutputCache {
    /// Create an empty view holding at most `max_count` outputs
    pub fn new(max_count: usize) -> Self {
        let capacity = NonZeroUsize::new(max_count).unwrap_or(NonZeroUsize::MIN);
        Self {
            max_count,
            outputs: LruCache::new(capacity),
            spent: HashSet::new(),
            evicted: 0,
        }
    }

    /// Resident bound
    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Number of resident outputs
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Whether no output is resident
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Total outputs evicted to respect the bound
    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }

    /// Number of spends recorded and not yet committed
    pub fn spent_count(&self) -> usize {
        self.spent.len()
    }

    /// Look up a resident output
    pub fn get(&self, outpoint: &TransactionOutputIdentifier) -> Option<&UnspentTransactionOutput> {
        self.outputs.peek(outpoint)
    }

    /// Whether the outpoint was spent in this view
    pub fn is_spent(&self, outpoint: &TransactionOutputIdentifier) -> bool {
        self.spent.contains(outpoint)
    }

    /// Insert or replace an output, evicting the oldest if the bound is reached
    ///
    /// Replacing a resident output keeps its place in the eviction order.
    pub fn insert(&mut self, outpoint: TransactionOutputIdentifier, output: UnspentTransactionOutput) {
        self.spent.remove(&outpoint);
        if let Some(resident) = self.outputs.peek_mut(&outpoint) {
            *resident = output;
            return;
        }
        if self.max_count == 0 {
            self.evicted += 1;
            return;
        }
        if self.outputs.push(outpoint, output).is_some() {
            self.evicted += 1;
        }
    }

    /// Remove an output without recording a spend
    pub fn remove(&mut self, outpoint: &TransactionOutputIdentifier) -> Option<UnspentTransactionOutput> {
        self.outputs.pop(outpoint)
    }

    /// Record that an output was spent
    pub fn mark_spent(&mut self, outpoint: TransactionOutputIdentifier) {
        self.outputs.pop(&outpoint);
        self.spent.insert(outpoint);
    }

    /// Merge this view into `target`: spends first, then outputs oldest first
    pub fn commit_into(mut self, target: &mut UnspentTransactionOutputCache) {
        for outpoint in self.spent.drain() {
            target.outputs.pop(&outpoint);
        }
        while let Some((outpoint, output)) = self.outputs.pop_lru() {
            target.insert(outpoint, output);
        }
    }

    /// Remove outputs created by the transaction with the given hash
    pub fn remove_transaction(&mut self, transaction_hash: &Sha256Hash) -> usize {
        let doomed: Vec<TransactionOutputIdentifier> = self
            .outputs
            .iter()
            .filter(|(outpoint, _)| &outpoint.transaction_hash == transaction_hash)
            .map(|(outpoint, _)| *outpoint)
            .collect();
        for outpoint in &doomed {
            self.outputs.pop(outpoint);
        }
        doomed.len()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.outputs.clear();
        self.spent.clear();
    }
}
