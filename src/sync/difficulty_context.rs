//! Read-only chain lookups for difficulty calculation
//!
//! The retarget algorithm lives outside this crate; it asks for headers,
//! median times and chain work by height through
//! [`DifficultyCalculatorContext`]. Missing data is `None`, never an error.

use crate::core::constants::MEDIAN_TIME_SPAN;
use crate::core::{BlockHeader, ChainWork, MedianBlockTime};
use crate::storage::{DatabaseSession, DatabaseSessionFactory, StorageResult, StoredBlockHeader};
use std::sync::Arc;
use tracing::warn;

/// Lookups a difficulty calculation needs
pub trait DifficultyCalculatorContext: Send + Sync {
    /// Header at `height` on the best chain
    fn header_at(&self, height: u64) -> Option<BlockHeader>;

    /// Median time past of the headers ending at `height`
    fn median_time_at(&self, height: u64) -> Option<MedianBlockTime>;

    /// Chain work of the best chain up to and including `height`
    fn chain_work_at(&self, height: u64) -> Option<ChainWork>;
}

/// Difficulty context backed by persistence
pub struct DatabaseDifficultyContext {
    database: Arc<dyn DatabaseSessionFactory>,
}

impl DatabaseDifficultyContext {
    /// Create a context reading through `database`
    pub fn new(database: Arc<dyn DatabaseSessionFactory>) -> Self {
        Self { database }
    }

    fn with_session<T>(
        &self,
        what: &str,
        f: impl FnOnce(&dyn DatabaseSession) -> StorageResult<Option<T>>,
    ) -> Option<T> {
        let result = self
            .database
            .new_session()
            .and_then(|session| f(session.as_ref()));
        match result {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, lookup = what, "Difficulty context lookup failed");
                None
            }
        }
    }

    fn stored_at(&self, height: u64) -> Option<StoredBlockHeader> {
        self.with_session("header", |session| session.block_header_at_height(height))
    }
}

impl DifficultyCalculatorContext for DatabaseDifficultyContext {
    fn header_at(&self, height: u64) -> Option<BlockHeader> {
        self.stored_at(height).map(|stored| stored.header)
    }

    fn median_time_at(&self, height: u64) -> Option<MedianBlockTime> {
        self.with_session("median time", |session| {
            let first = height.saturating_sub(MEDIAN_TIME_SPAN as u64 - 1);
            let mut timestamps = Vec::with_capacity(MEDIAN_TIME_SPAN);
            for h in first..=height {
                match session.block_header_at_height(h)? {
                    Some(stored) => timestamps.push(stored.header.timestamp),
                    None => return Ok(None),
                }
            }
            Ok(MedianBlockTime::from_timestamps(&timestamps))
        })
    }

    fn chain_work_at(&self, height: u64) -> Option<ChainWork> {
        self.stored_at(height).map(|stored| stored.chain_work)
    }
}
