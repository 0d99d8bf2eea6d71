//! Chain synchronization
//!
//! Header download and best-chain selection, the synchronization status the
//! rest of the node consults, and stall detection for outstanding requests.

pub mod context;
pub mod difficulty_context;
pub mod header_sync;
pub mod stall;
pub mod state;

pub use context::{
    Clock, ExecutionPool, HeaderSyncContext, ManualClock, NetworkAdjustedClock, NetworkTime,
    SystemClock, build_validation_pool,
};
pub use difficulty_context::{DatabaseDifficultyContext, DifficultyCalculatorContext};
pub use header_sync::{HeaderBatchOutcome, HeaderSync};
pub use stall::{Callback, RequestId, StalledRequestTracker};
pub use state::{SyncState, SynchronizationStatus};
