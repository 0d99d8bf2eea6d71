//! Connected peers
//!
//! [`PeerRegistry`] is the narrow view of the peer set that the sync
//! components depend on. [`ConnectedPeers`] is the in-process implementation:
//! each registered peer gets an outbound queue drained by its connection task,
//! byte counters, and an optional bloom filter.

pub mod bloom;
pub mod connection;
mod counting;

pub use bloom::BloomFilter;
pub use connection::{ConnectionHandlers, run_connection};

use crate::error::{Error, Result};
use crate::protocol::{Message, MessageType};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Process-local identifier of a connected peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// The peer set as seen by sync and relay
pub trait PeerRegistry: Send + Sync {
    /// Currently connected peers
    fn connected_peers(&self) -> Vec<PeerId>;

    /// The peer's installed bloom filter, if any
    fn bloom_filter(&self, peer: PeerId) -> Option<BloomFilter>;

    /// Total raw bytes read from the peer's stream, `None` if unknown
    fn bytes_received(&self, peer: PeerId) -> Option<u64>;

    /// Queue a message for the peer
    fn send_message(&self, peer: PeerId, command: MessageType, payload: Bytes) -> Result<()>;
}

/// Per-peer state held by [`ConnectedPeers`]
#[derive(Debug)]
pub struct PeerHandle {
    address: String,
    outbound: mpsc::UnboundedSender<Message>,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    bloom_filter: RwLock<Option<BloomFilter>>,
}

impl PeerHandle {
    /// Remote address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Total bytes received
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Total bytes queued for sending
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}

/// Snapshot of a peer for logging and status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Peer identifier
    pub id: PeerId,
    /// Remote address
    pub address: String,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total bytes queued for sending
    pub bytes_sent: u64,
    /// Whether a bloom filter is installed
    pub has_bloom_filter: bool,
}

/// `DashMap`-backed peer registry
#[derive(Debug, Default)]
pub struct ConnectedPeers {
    peers: DashMap<PeerId, Arc<PeerHandle>>,
    next_id: AtomicU64,
}

impl ConnectedPeers {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection, returning its id and outbound queue
    pub fn register(&self, address: impl Into<String>) -> (PeerId, mpsc::UnboundedReceiver<Message>) {
        let id = PeerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbound, receiver) = mpsc::unbounded_channel();
        let handle = PeerHandle {
            address: address.into(),
            outbound,
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bloom_filter: RwLock::new(None),
        };
        self.peers.insert(id, Arc::new(handle));
        (id, receiver)
    }

    /// Forget a peer
    pub fn unregister(&self, peer: PeerId) {
        self.peers.remove(&peer);
    }

    /// Number of connected peers
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer is connected
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Handle of a connected peer
    pub fn get(&self, peer: PeerId) -> Option<Arc<PeerHandle>> {
        self.peers.get(&peer).map(|entry| Arc::clone(entry.value()))
    }

    /// Add to the peer's received byte counter
    pub fn record_bytes_received(&self, peer: PeerId, bytes: usize) {
        if let Some(handle) = self.peers.get(&peer) {
            handle.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        }
    }

    /// Install or remove the peer's bloom filter
    pub fn set_bloom_filter(&self, peer: PeerId, filter: Option<BloomFilter>) {
        if let Some(handle) = self.peers.get(&peer) {
            *handle.bloom_filter.write() = filter;
        }
    }

    /// Snapshot of every connected peer, ordered by id
    pub fn snapshot(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .peers
            .iter()
            .map(|entry| PeerInfo {
                id: *entry.key(),
                address: entry.address.clone(),
                bytes_received: entry.bytes_received(),
                bytes_sent: entry.bytes_sent(),
                has_bloom_filter: entry.bloom_filter.read().is_some(),
            })
            .collect();
        peers.sort_by_key(|info| info.id);
        peers
    }
}

impl PeerRegistry for ConnectedPeers {
    fn connected_peers(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    fn bloom_filter(&self, peer: PeerId) -> Option<BloomFilter> {
        self.peers.get(&peer)?.bloom_filter.read().clone()
    }

    fn bytes_received(&self, peer: PeerId) -> Option<u64> {
        self.peers.get(&peer).map(|handle| handle.bytes_received())
    }

    fn send_message(&self, peer: PeerId, command: MessageType, payload: Bytes) -> Result<()> {
        let handle = self
            .get(peer)
            .ok_or_else(|| Error::peer(format!("{peer} is not connected")))?;
        let size = payload.len();
        handle
            .outbound
            .send(Message::new(command, payload))
            .map_err(|e| Error::channel_send(format!("{peer}: {e}")))?;
        handle.bytes_sent.fetch_add(size as u64, Ordering::Relaxed);
        Ok(())
    }
}
