//! Header synchronization
//!
//! Asks peers for headers following our best chain and folds the batches they
//! return into persistence. Chain work decides between competing chains: the
//! head only moves to a header whose cumulative work strictly exceeds the
//! current head's.

use crate::core::{BlockHeader, Sha256Hash};
use crate::error::{Error, Result};
use crate::peer::PeerId;
use crate::protocol::MessageType;
use crate::protocol::payload::{GetHeaders, MAX_HEADERS_PER_MESSAGE};
use crate::storage::{StorageError, StoredBlockHeader};
use crate::sync::context::HeaderSyncContext;
use crate::sync::stall::{Callback, RequestId, StalledRequestTracker};
use crate::sync::state::{SyncState, SynchronizationStatus};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Number of consecutive heights at the tip of a locator before the step doubles
const DENSE_LOCATOR_HEIGHTS: usize = 10;

/// Heights to include in a block locator for a chain whose tip is at `tip`
///
/// The ten most recent heights, then exponentially spaced heights back to
/// genesis, which is always last.
pub fn locator_heights(tip: u64) -> Vec<u64> {
    let mut heights = Vec::new();
    let mut height = tip;
    let mut step = 1u64;
    loop {
        heights.push(height);
        if height == 0 {
            break;
        }
        if heights.len() >= DENSE_LOCATOR_HEIGHTS {
            step = step.saturating_mul(2);
        }
        height = height.saturating_sub(step);
    }
    heights
}

/// What a processed header batch did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBatchOutcome {
    /// Headers newly stored
    pub accepted: usize,
    /// Headers that were already stored
    pub already_known: usize,
    /// Whether the best chain head moved
    pub head_moved: bool,
    /// The head after processing, if any
    pub head: Option<StoredBlockHeader>,
}

/// Header synchronization driver
pub struct HeaderSync {
    context: HeaderSyncContext,
    tracker: Arc<StalledRequestTracker>,
    status: Arc<SynchronizationStatus>,
    in_flight: Arc<DashMap<PeerId, RequestId>>,
}

impl HeaderSync {
    /// Create a driver
    pub fn new(
        context: HeaderSyncContext,
        tracker: Arc<StalledRequestTracker>,
        status: Arc<SynchronizationStatus>,
    ) -> Self {
        Self {
            context,
            tracker,
            status,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Shared collaborators
    pub fn context(&self) -> &HeaderSyncContext {
        &self.context
    }

    /// Whether a `getheaders` to `peer` is outstanding
    pub fn has_request_in_flight(&self, peer: PeerId) -> bool {
        self.in_flight.contains_key(&peer)
    }

    /// Build a block locator from the persisted best chain
    pub fn block_locator(&self) -> Result<Vec<Sha256Hash>> {
        let session = self.context.database().new_session()?;
        let Some(head) = session.head_block_header()? else {
            return Ok(Vec::new());
        };
        let mut locator = Vec::new();
        for height in locator_heights(head.height) {
            if let Some(stored) = session.block_header_at_height(height)? {
                locator.push(stored.hash);
            }
        }
        Ok(locator)
    }

    /// Send `getheaders` to `peer` and start watching it for a stall
    ///
    /// At most one request per peer is outstanding; a second call while one is
    /// in flight returns the existing request. The slot is reserved before the
    /// message is queued, so concurrent callers send a single request.
    pub fn request_headers(&self, peer: PeerId) -> Result<RequestId> {
        if let Some(existing) = self.in_flight.get(&peer) {
            return Ok(*existing);
        }

        let locator = self.block_locator()?;
        let payload = GetHeaders::new(locator).encode()?;
        let peers = self.context.peers();
        let baseline = peers
            .bytes_received(peer)
            .ok_or_else(|| Error::peer(format!("{peer} is not connected")))?;

        let slot = match self.in_flight.entry(peer) {
            Entry::Occupied(existing) => return Ok(*existing.get()),
            Entry::Vacant(slot) => slot,
        };
        peers.send_message(peer, MessageType::GetHeaders, payload)?;

        let in_flight = Arc::clone(&self.in_flight);
        let on_failure: Callback = Box::new(move || {
            in_flight.remove(&peer);
            warn!(%peer, "Header request stalled");
        });
        let id = self.tracker.track(
            peer,
            baseline,
            move || debug!(%peer, "Header request answered"),
            Some(on_failure),
        );
        slot.insert(id);
        debug!(%peer, request = %id, "Requested headers");
        Ok(id)
    }

    /// Fold a `headers` batch from `peer` into persistence
    ///
    /// Headers must form a chain whose first parent is already stored. Each
    /// new header's chain work is its parent's plus its own proof.
    pub fn process_headers(&self, peer: PeerId, headers: &[BlockHeader]) -> Result<HeaderBatchOutcome> {
        if let Some((_, id)) = self.in_flight.remove(&peer) {
            self.tracker.complete(id);
        }

        for pair in headers.windows(2) {
            if pair[1].previous_block_hash != pair[0].hash() {
                return Err(Error::sync(format!("{peer} sent a non-contiguous header batch")));
            }
        }

        let mut session = self.context.database().new_session()?;
        let mut outcome = HeaderBatchOutcome::default();
        let mut best: Option<StoredBlockHeader> = None;

        for header in headers {
            let stored = match session.block_header_by_hash(&header.hash())? {
                Some(existing) => {
                    outcome.already_known += 1;
                    existing
                }
                None => {
                    let stored = session.store_block_header(header).map_err(|e| match e {
                        StorageError::NotFound(_) => Error::sync(format!(
                            "{peer} sent headers whose parent {} is unknown",
                            header.previous_block_hash
                        )),
                        other => Error::Storage(other),
                    })?;
                    outcome.accepted += 1;
                    stored
                }
            };
            if best.as_ref().is_none_or(|b| stored.chain_work > b.chain_work) {
                best = Some(stored);
            }
        }

        let head = session.head_block_header()?;
        outcome.head = match (best, head) {
            (Some(candidate), current) if is_better(&candidate, current.as_ref()) => {
                session.set_head_block(candidate.id)?;
                outcome.head_moved = true;
                info!(
                    %peer,
                    height = candidate.height,
                    hash = %candidate.hash,
                    chain_work = %candidate.chain_work,
                    "Best chain head moved"
                );
                Some(candidate)
            }
            (_, current) => current,
        };

        self.update_state(headers.len());
        debug!(
            %peer,
            accepted = outcome.accepted,
            already_known = outcome.already_known,
            "Processed header batch"
        );
        Ok(outcome)
    }

    /// Run [`process_headers`](Self::process_headers) on the execution pool
    pub async fn process_headers_on_pool(
        self: Arc<Self>,
        peer: PeerId,
        headers: Vec<BlockHeader>,
    ) -> Result<HeaderBatchOutcome> {
        let (tx, rx) = oneshot::channel();
        let sync = Arc::clone(&self);
        self.context.pool().execute(Box::new(move || {
            let _ = tx.send(sync.process_headers(peer, &headers));
        }));
        rx.await
            .map_err(|_| Error::sync("header validation task dropped its result"))?
    }

    /// Forget a disconnected peer's outstanding request
    pub fn peer_disconnected(&self, peer: PeerId) {
        self.in_flight.remove(&peer);
    }

    fn update_state(&self, batch_len: usize) {
        // A full batch means the peer has more to send
        if batch_len >= MAX_HEADERS_PER_MESSAGE {
            if self.status.state() == SyncState::Synchronized {
                self.status.set_state(SyncState::Synchronizing);
            }
        } else {
            self.status.set_state(SyncState::Synchronized);
        }
    }
}

fn is_better(candidate: &StoredBlockHeader, current: Option<&StoredBlockHeader>) -> bool {
    match current {
        Some(current) => candidate.chain_work > current.chain_work,
        None => true,
    }
}
