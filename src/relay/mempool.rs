//! `mempool` query handling
//!
//! A peer sends `mempool` to learn which unconfirmed transactions we hold. We
//! answer with `inv` messages listing their hashes, filtered through the peer's
//! bloom filter when it has installed one.

use crate::core::{InventoryItem, Sha256Hash, TransactionId};
use crate::peer::{BloomFilter, PeerId, PeerRegistry};
use crate::protocol::MessageType;
use crate::protocol::payload::{MAX_INVENTORY_ITEMS, encode_inventory};
use crate::storage::{DatabaseSession, DatabaseSessionFactory, StorageResult};
use std::sync::Arc;
use tracing::{debug, warn};

/// Responds to `mempool` queries
pub struct MempoolRelayResponder {
    database: Arc<dyn DatabaseSessionFactory>,
    peers: Arc<dyn PeerRegistry>,
}

impl MempoolRelayResponder {
    /// Create a responder reading unconfirmed transactions from `database`
    pub fn new(database: Arc<dyn DatabaseSessionFactory>, peers: Arc<dyn PeerRegistry>) -> Self {
        Self { database, peers }
    }

    /// Answer a `mempool` query from `peer`
    ///
    /// Returns the number of inventory items sent. Persistence failures are
    /// logged and answered with nothing.
    pub fn respond(&self, peer: PeerId) -> usize {
        let filter = self.peers.bloom_filter(peer);
        let hashes = match self.collect_hashes(filter.as_ref()) {
            Ok(hashes) => hashes,
            Err(e) => {
                warn!(%peer, error = %e, "Failed to load unconfirmed transactions");
                return 0;
            }
        };
        if hashes.is_empty() {
            debug!(%peer, filtered = filter.is_some(), "No unconfirmed transactions to announce");
            return 0;
        }

        let items: Vec<InventoryItem> = hashes.into_iter().map(InventoryItem::transaction).collect();
        let mut sent = 0;
        for chunk in items.chunks(MAX_INVENTORY_ITEMS) {
            let payload = match encode_inventory(chunk) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(%peer, error = %e, "Failed to encode inventory");
                    break;
                }
            };
            if let Err(e) = self.peers.send_message(peer, MessageType::Inv, payload) {
                warn!(%peer, error = %e, "Failed to send inventory");
                break;
            }
            sent += chunk.len();
        }
        debug!(%peer, items = sent, filtered = filter.is_some(), "Answered mempool query");
        sent
    }

    fn collect_hashes(&self, filter: Option<&BloomFilter>) -> StorageResult<Vec<Sha256Hash>> {
        let session = self.database.new_session()?;
        let ids = session.unconfirmed_transaction_ids()?;
        match filter {
            Some(filter) => matching_hashes(session.as_ref(), &ids, filter),
            None => {
                let mut hashes = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(hash) = session.transaction_hash(id)? {
                        hashes.push(hash);
                    }
                }
                Ok(hashes)
            }
        }
    }
}

fn matching_hashes(
    session: &dyn DatabaseSession,
    ids: &[TransactionId],
    filter: &BloomFilter,
) -> StorageResult<Vec<Sha256Hash>> {
    let mut hashes = Vec::new();
    for id in ids {
        let matching = session
            .transaction(*id)?
            .filter(|transaction| filter.matches_transaction(transaction));
        if let Some(transaction) = matching {
            hashes.push(transaction.hash());
        }
    }
    Ok(hashes)
}
