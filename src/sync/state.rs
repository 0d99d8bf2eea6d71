//! Synchronization status
//!
//! Tracks whether the node is in initial block download, catching up, or
//! synchronized, and answers the readiness checks the relay path asks before
//! trusting its own view of the chain.

use crate::log_state_change;
use crate::storage::DatabaseSessionFactory;
use crate::sync::context::Clock;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Head age under which the node accepts transactions, in milliseconds
pub const READY_FOR_TRANSACTIONS_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;

/// Synchronization state of the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Initial block download
    NotSynchronized,
    /// Catching up with peers
    Synchronizing,
    /// Caught up
    #[default]
    Synchronized,
}

impl SyncState {
    /// Name used in logs and status output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSynchronized => "not_synchronized",
            Self::Synchronizing => "synchronizing",
            Self::Synchronized => "synchronized",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Synchronization status tracker
pub struct SynchronizationStatus {
    state: RwLock<SyncState>,
    database: Arc<dyn DatabaseSessionFactory>,
    clock: Arc<dyn Clock>,
}

impl SynchronizationStatus {
    /// Create a tracker in the default state
    pub fn new(database: Arc<dyn DatabaseSessionFactory>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(SyncState::default()),
            database,
            clock,
        }
    }

    /// Current state
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Change state, logging the transition
    pub fn set_state(&self, new_state: SyncState) {
        let old_state = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, new_state)
        };
        if old_state != new_state {
            log_state_change!("synchronization", old_state, new_state);
        }
    }

    /// Whether the node is synchronized
    pub fn is_synchronized(&self) -> bool {
        self.state() == SyncState::Synchronized
    }

    /// Whether the head block is recent enough to accept transactions
    ///
    /// Recomputed from persistence on every call. Persistence failures are
    /// logged and reported as not ready.
    pub fn is_ready_for_transactions(&self) -> bool {
        let head = match self
            .database
            .new_session()
            .and_then(|session| session.head_block_header())
        {
            Ok(head) => head,
            Err(e) => {
                warn!(error = %e, "Unable to load head block for readiness check");
                return false;
            }
        };
        let Some(head) = head else {
            return false;
        };
        let head_time_ms = head.header.timestamp as u64 * 1000;
        self.clock.now_ms().saturating_sub(head_time_ms) < READY_FOR_TRANSACTIONS_WINDOW_MS
    }

    /// Height of the head block, zero without one or on persistence failure
    pub fn current_height(&self) -> u64 {
        match self
            .database
            .new_session()
            .and_then(|session| session.head_block_header())
        {
            Ok(head) => head.map(|stored| stored.height).unwrap_or(0),
            Err(e) => {
                warn!(error = %e, "Unable to load head block height");
                0
            }
        }
    }
}
