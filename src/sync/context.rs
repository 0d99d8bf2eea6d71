//! Collaborators shared by the header-sync components
//!
//! [`HeaderSyncContext`] bundles the peer registry, the persistence factory,
//! the clocks and the execution pool. It is built once and never mutated; the
//! accessors hand out the injected instances.

use crate::error::{Error, Result};
use crate::peer::{PeerId, PeerRegistry};
use crate::storage::DatabaseSessionFactory;
use crate::utils::current_time_ms;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Largest peer clock offset taken into account, in milliseconds
pub const MAX_TIME_OFFSET_MS: i64 = 70 * 60 * 1000;

/// Wall clock
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;

    /// Seconds since the Unix epoch
    fn now_seconds(&self) -> u64 {
        self.now_ms() / 1000
    }
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        current_time_ms()
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `now_ms`
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    /// Set the current time
    pub fn set_ms(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Move the clock forward
    pub fn advance_ms(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Time as agreed with the network
pub trait NetworkTime: Send + Sync {
    /// Network-adjusted milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;

    /// Current offset from the local clock in milliseconds
    fn offset_ms(&self) -> i64;
}

/// Local clock corrected by the median of peer-reported offsets
///
/// Offsets larger than [`MAX_TIME_OFFSET_MS`] in either direction are ignored.
pub struct NetworkAdjustedClock {
    clock: Arc<dyn Clock>,
    samples: RwLock<HashMap<PeerId, i64>>,
}

impl NetworkAdjustedClock {
    /// Create an adjusted clock over `clock` with no samples
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            samples: RwLock::new(HashMap::new()),
        }
    }

    /// Record the offset between a peer's clock and ours
    pub fn add_sample(&self, peer: PeerId, peer_time_ms: u64) {
        let offset = peer_time_ms as i64 - self.clock.now_ms() as i64;
        self.samples.write().insert(peer, offset);
    }

    /// Drop a disconnected peer's sample
    pub fn remove_sample(&self, peer: PeerId) {
        self.samples.write().remove(&peer);
    }
}

impl NetworkTime for NetworkAdjustedClock {
    fn now_ms(&self) -> u64 {
        let now = self.clock.now_ms() as i64 + self.offset_ms();
        now.max(0) as u64
    }

    fn offset_ms(&self) -> i64 {
        let mut offsets: Vec<i64> = self
            .samples
            .read()
            .values()
            .copied()
            .filter(|offset| offset.abs() <= MAX_TIME_OFFSET_MS)
            .collect();
        if offsets.is_empty() {
            return 0;
        }
        offsets.sort_unstable();
        offsets[offsets.len() / 2]
    }
}

/// Where CPU-bound validation work runs
pub trait ExecutionPool: Send + Sync {
    /// Run `task` on the pool
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>);

    /// Number of worker threads
    fn thread_count(&self) -> usize;
}

impl ExecutionPool for rayon::ThreadPool {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        self.spawn(task);
    }

    fn thread_count(&self) -> usize {
        self.current_num_threads()
    }
}

impl ExecutionPool for tokio::runtime::Handle {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        // Detached; the task reports through its own channels
        drop(self.spawn_blocking(task));
    }

    fn thread_count(&self) -> usize {
        self.metrics().num_workers()
    }
}

/// Build the validation thread pool; zero threads means one per CPU
pub fn build_validation_pool(threads: usize) -> Result<rayon::ThreadPool> {
    let threads = if threads == 0 { num_cpus::get() } else { threads };
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|index| format!("validation-{index}"))
        .build()
        .map_err(|e| Error::config(format!("failed to build validation pool: {e}")))
}

/// Immutable bundle of header-sync collaborators
#[derive(Clone)]
pub struct HeaderSyncContext {
    peers: Arc<dyn PeerRegistry>,
    database: Arc<dyn DatabaseSessionFactory>,
    network_time: Arc<dyn NetworkTime>,
    clock: Arc<dyn Clock>,
    pool: Arc<dyn ExecutionPool>,
}

impl HeaderSyncContext {
    /// Bundle the collaborators
    pub fn new(
        peers: Arc<dyn PeerRegistry>,
        database: Arc<dyn DatabaseSessionFactory>,
        network_time: Arc<dyn NetworkTime>,
        clock: Arc<dyn Clock>,
        pool: Arc<dyn ExecutionPool>,
    ) -> Self {
        Self {
            peers,
            database,
            network_time,
            clock,
            pool,
        }
    }

    /// Peer registry
    pub fn peers(&self) -> &Arc<dyn PeerRegistry> {
        &self.peers
    }

    /// Persistence session factory
    pub fn database(&self) -> &Arc<dyn DatabaseSessionFactory> {
        &self.database
    }

    /// Network-adjusted clock
    pub fn network_time(&self) -> &Arc<dyn NetworkTime> {
        &self.network_time
    }

    /// Wall clock
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Execution pool
    pub fn pool(&self) -> &Arc<dyn ExecutionPool> {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::ConnectedPeers;
    use crate::storage::InMemoryDatabase;
    use std::sync::mpsc;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(5_000);
        assert_eq!(clock.now_seconds(), 5);
        clock.advance_ms(1_500);
        assert_eq!(clock.now_ms(), 6_500);
        clock.set_ms(0);
        assert_eq!(clock.now_ms(), 0);
    }

    #[test]
    fn test_network_adjusted_median() {
        let clock = Arc::new(ManualClock::new(1_000_000_000));
        let adjusted = NetworkAdjustedClock::new(clock.clone());
        assert_eq!(adjusted.offset_ms(), 0);

        adjusted.add_sample(PeerId(1), 1_000_000_000 + 1_000);
        adjusted.add_sample(PeerId(2), 1_000_000_000 + 3_000);
        adjusted.add_sample(PeerId(3), 1_000_000_000 - 2_000);
        assert_eq!(adjusted.offset_ms(), 1_000);
        assert_eq!(adjusted.now_ms(), 1_000_001_000);

        adjusted.remove_sample(PeerId(2));
        assert_eq!(adjusted.offset_ms(), 1_000);
    }

    #[test]
    fn test_network_adjusted_ignores_outliers() {
        let clock = Arc::new(ManualClock::new(10_000_000_000));
        let adjusted = NetworkAdjustedClock::new(clock);
        adjusted.add_sample(PeerId(1), 10_000_000_000 + MAX_TIME_OFFSET_MS as u64 + 1);
        assert_eq!(adjusted.offset_ms(), 0);
    }

    #[test]
    fn test_rayon_pool_executes() {
        let pool = build_validation_pool(2).unwrap();
        assert_eq!(pool.thread_count(), 2);
        let (tx, rx) = mpsc::channel();
        pool.execute(Box::new(move || tx.send(7).unwrap()));
        assert_eq!(rx.recv().unwrap(), 7);
    }

    #[test]
    fn test_context_returns_injected_instances() {
        let peers: Arc<dyn PeerRegistry> = Arc::new(ConnectedPeers::new());
        let database: Arc<dyn DatabaseSessionFactory> = Arc::new(InMemoryDatabase::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let network_time: Arc<dyn NetworkTime> = Arc::new(NetworkAdjustedClock::new(clock.clone()));
        let pool: Arc<dyn ExecutionPool> = Arc::new(build_validation_pool(1).unwrap());

        let context = HeaderSyncContext::new(
            peers.clone(),
            database.clone(),
            network_time.clone(),
            clock.clone(),
            pool.clone(),
        );
        assert!(Arc::ptr_eq(context.peers(), &peers));
        assert!(Arc::ptr_eq(context.database(), &database));
        assert!(Arc::ptr_eq(context.network_time(), &network_time));
        assert!(Arc::ptr_eq(context.clock(), &clock));
        assert!(Arc::ptr_eq(context.pool(), &pool));
        assert!(Arc::ptr_eq(context.clone().clock(), &clock));
    }
}
