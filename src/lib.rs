//! # Chainsync
//!
//! The chain synchronization core of a full blockchain node: the peer wire
//! frame codec, cumulative chain work, header download with best-chain
//! selection by work, stall detection for outstanding peer requests, a
//! two-tier validation cache, and answers to peers' `mempool` queries.
//!
//! ## Architecture
//!
//! Each peer connection runs as its own task over a framed stream
//! ([`peer::run_connection`]). Header batches are validated on a separate
//! execution pool and folded into persistence through the
//! [`storage::DatabaseSessionFactory`] boundary. Components depend on narrow
//! traits ([`peer::PeerRegistry`], [`sync::Clock`], [`sync::ExecutionPool`])
//! bundled into immutable contexts, so tests substitute in-memory versions.

#![warn(
    missing_docs,
    rust_2018_idioms,
    unused_lifetimes,
    unused_qualifications,
    clippy::all
)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod relay;
pub mod storage;
pub mod sync;
pub mod utils;

pub use crate::error::{Error, Result};
pub use config::Config;
pub use core::{BlockHeader, ChainWork, Sha256Hash};
pub use protocol::{FrameCodec, MessageType, NetworkMagic};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        cache::{DatabaseManagerCache, LocalDatabaseManagerCache},
        config::Config,
        core::{BlockHeader, ChainWork, Sha256Hash},
        error::{Error, Result},
        peer::{ConnectedPeers, PeerId, PeerRegistry},
        protocol::{FrameCodec, Message, MessageType, NetworkMagic},
        storage::{DatabaseSession, DatabaseSessionFactory},
        sync::{HeaderSync, StalledRequestTracker, SyncState, SynchronizationStatus},
    };
}
