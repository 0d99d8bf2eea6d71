//! Stalled request detection
//!
//! A request to a peer is stalled when the stall window has elapsed since it
//! was issued and the peer has sent no bytes since. Each tracked request
//! resolves exactly once: either its success callback runs on completion, or
//! its failure callback runs when the watchdog declares it stalled.

use crate::peer::PeerId;
use crate::sync::context::Clock;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, warn};

/// Callback run when a request resolves
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Identifier of a tracked request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct Progress {
    issued_at_ms: u64,
    byte_baseline: u64,
}

struct PendingRequest {
    peer: PeerId,
    progress: Mutex<Progress>,
    resolved: AtomicBool,
    on_success: Mutex<Option<Callback>>,
    on_failure: Mutex<Option<Callback>>,
}

impl PendingRequest {
    /// Claim the right to resolve this request; true for exactly one caller
    fn claim(&self) -> bool {
        self.resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Tracks outstanding peer requests and fails the ones that stall
pub struct StalledRequestTracker {
    pending: DashMap<RequestId, Arc<PendingRequest>>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
    stall_window_ms: u64,
    shutdown: AtomicBool,
}

impl StalledRequestTracker {
    /// Create a tracker with the given stall window
    pub fn new(clock: Arc<dyn Clock>, stall_window: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            clock,
            stall_window_ms: stall_window.as_millis() as u64,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Stall window in milliseconds
    pub fn stall_window_ms(&self) -> u64 {
        self.stall_window_ms
    }

    /// Number of unresolved requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Start tracking a request issued to `peer`
    ///
    /// `bytes_received_now` is the peer's byte counter at issue time and
    /// becomes the progress baseline.
    pub fn track(
        &self,
        peer: PeerId,
        bytes_received_now: u64,
        on_success: impl FnOnce() + Send + 'static,
        on_failure: Option<Callback>,
    ) -> RequestId {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = PendingRequest {
            peer,
            progress: Mutex::new(Progress {
                issued_at_ms: self.clock.now_ms(),
                byte_baseline: bytes_received_now,
            }),
            resolved: AtomicBool::new(false),
            on_success: Mutex::new(Some(Box::new(on_success))),
            on_failure: Mutex::new(on_failure),
        };
        self.pending.insert(id, Arc::new(request));
        debug!(%peer, request = %id, "Tracking request");
        id
    }

    /// Mark a request complete, running its success callback
    ///
    /// Returns false if the request already stalled or is unknown.
    pub fn complete(&self, id: RequestId) -> bool {
        let Some((_, request)) = self.pending.remove(&id) else {
            return false;
        };
        if !request.claim() {
            return false;
        }
        if let Some(callback) = request.on_success.lock().take() {
            callback();
        }
        true
    }

    /// Unresolved requests issued to `peer`
    pub fn requests_for(&self, peer: PeerId) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|entry| entry.peer == peer)
            .map(|entry| *entry.key())
            .collect();
        ids.sort();
        ids
    }

    /// One watchdog pass; returns the number of requests declared stalled
    ///
    /// `bytes_for` reports a peer's current byte counter, `None` once the peer
    /// is gone. A request whose peer has sent bytes since the baseline is
    /// refreshed instead of failed.
    pub fn check_stalls(&self, bytes_for: impl Fn(PeerId) -> Option<u64>) -> usize {
        let now = self.clock.now_ms();
        // Snapshot so no map shard is locked while callbacks run
        let snapshot: Vec<(RequestId, Arc<PendingRequest>)> = self
            .pending
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        let mut stalled = 0;
        for (id, request) in snapshot {
            let is_stalled = {
                let mut progress = request.progress.lock();
                let current = bytes_for(request.peer).unwrap_or(progress.byte_baseline);
                if current > progress.byte_baseline {
                    progress.byte_baseline = current;
                    progress.issued_at_ms = now;
                    false
                } else {
                    now.saturating_sub(progress.issued_at_ms) >= self.stall_window_ms
                }
            };
            if !is_stalled || !request.claim() {
                continue;
            }

            self.pending.remove(&id);
            stalled += 1;
            warn!(peer = %request.peer, request = %id, "Request stalled");
            if let Some(callback) = request.on_failure.lock().take() {
                callback();
            }
        }
        stalled
    }

    /// Stop a running watchdog after its current pass
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Run [`check_stalls`](Self::check_stalls) every `period` until shut down
    pub async fn run_watchdog<F>(self: Arc<Self>, period: Duration, bytes_for: F)
    where
        F: Fn(PeerId) -> Option<u64> + Send + Sync + 'static,
    {
        let mut ticker = interval(period);
        while !self.shutdown.load(Ordering::Relaxed) {
            ticker.tick().await;
            let stalled = self.check_stalls(&bytes_for);
            if stalled > 0 {
                debug!(stalled, remaining = self.pending_count(), "Watchdog pass");
            }
        }
    }
}
