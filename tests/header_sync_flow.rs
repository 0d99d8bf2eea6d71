//! End-to-end header synchronization against the in-memory store

use chainsync::core::{BlockHeader, ChainWork, Difficulty, Sha256Hash};
use chainsync::error::Error;
use chainsync::peer::{ConnectedPeers, PeerId, PeerRegistry};
use chainsync::protocol::payload::GetHeaders;
use chainsync::protocol::{Message, MessageType};
use chainsync::storage::{DatabaseSession, DatabaseSessionFactory, InMemoryDatabase};
use chainsync::sync::{
    HeaderSync, HeaderSyncContext, ManualClock, NetworkAdjustedClock, StalledRequestTracker,
    SyncState, SynchronizationStatus, build_validation_pool,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const STALL_WINDOW: Duration = Duration::from_secs(20);
const NOW_MS: u64 = 1_700_000_000_000;

struct Fixture {
    db: InMemoryDatabase,
    peers: Arc<ConnectedPeers>,
    clock: Arc<ManualClock>,
    tracker: Arc<StalledRequestTracker>,
    status: Arc<SynchronizationStatus>,
    sync: Arc<HeaderSync>,
}

impl Fixture {
    fn new() -> Self {
        let db = InMemoryDatabase::new();
        let database: Arc<dyn DatabaseSessionFactory> = Arc::new(db.clone());
        let peers = Arc::new(ConnectedPeers::new());
        let clock = Arc::new(ManualClock::new(NOW_MS));
        let context = HeaderSyncContext::new(
            peers.clone(),
            Arc::clone(&database),
            Arc::new(NetworkAdjustedClock::new(clock.clone())),
            clock.clone(),
            Arc::new(build_validation_pool(1).unwrap()),
        );
        let tracker = Arc::new(StalledRequestTracker::new(clock.clone(), STALL_WINDOW));
        let status = Arc::new(SynchronizationStatus::new(database, clock.clone()));
        let sync = Arc::new(HeaderSync::new(
            context,
            Arc::clone(&tracker),
            Arc::clone(&status),
        ));
        Self {
            db,
            peers,
            clock,
            tracker,
            status,
            sync,
        }
    }

    fn connect(&self) -> (PeerId, UnboundedReceiver<Message>) {
        self.peers.register("192.0.2.1:8333")
    }

    fn head(&self) -> (u64, Sha256Hash, ChainWork) {
        let head = self
            .db
            .new_session()
            .unwrap()
            .head_block_header()
            .unwrap()
            .expect("no head");
        (head.height, head.hash, head.chain_work)
    }
}

fn header(previous: Sha256Hash, nonce: u32, difficulty: Difficulty) -> BlockHeader {
    BlockHeader {
        version: 1,
        previous_block_hash: previous,
        merkle_root: Sha256Hash::digest(&nonce.to_le_bytes()),
        timestamp: 1_700_000_000 + nonce,
        difficulty,
        nonce,
    }
}

fn chain(from: Sha256Hash, length: u32, first_nonce: u32, difficulty: Difficulty) -> Vec<BlockHeader> {
    let mut headers = Vec::new();
    let mut previous = from;
    for i in 0..length {
        let next = header(previous, first_nonce + i, difficulty);
        previous = next.hash();
        headers.push(next);
    }
    headers
}

#[test]
fn test_longest_chain_by_work_wins() {
    let fx = Fixture::new();
    let (peer, _outbound) = fx.connect();
    let base = Difficulty::BASE_DIFFICULTY;

    let genesis = header(Sha256Hash::EMPTY, 0, base);
    let main = chain(genesis.hash(), 3, 100, base);
    let mut batch = vec![genesis.clone()];
    batch.extend(main.iter().cloned());

    let outcome = fx.sync.process_headers(peer, &batch).unwrap();
    assert_eq!(outcome.accepted, 4);
    assert!(outcome.head_moved);
    let (height, hash, _) = fx.head();
    assert_eq!(height, 3);
    assert_eq!(hash, main[2].hash());

    // A shorter fork with one much harder header carries more work
    let heavy = chain(genesis.hash(), 1, 200, Difficulty::from_bits(0x1c00_ffff));
    let outcome = fx.sync.process_headers(peer, &heavy).unwrap();
    assert!(outcome.head_moved);
    let (height, hash, work) = fx.head();
    assert_eq!(height, 1);
    assert_eq!(hash, heavy[0].hash());
    assert_eq!(
        work,
        base.work() + Difficulty::from_bits(0x1c00_ffff).work()
    );
}

#[test]
fn test_equal_work_keeps_current_head() {
    let fx = Fixture::new();
    let (peer, _outbound) = fx.connect();
    let base = Difficulty::BASE_DIFFICULTY;

    let genesis = header(Sha256Hash::EMPTY, 0, base);
    let first = chain(genesis.hash(), 2, 10, base);
    fx.sync
        .process_headers(peer, &[vec![genesis.clone()], first.clone()].concat())
        .unwrap();

    let rival = chain(genesis.hash(), 2, 20, base);
    let outcome = fx.sync.process_headers(peer, &rival).unwrap();
    assert_eq!(outcome.accepted, 2);
    assert!(!outcome.head_moved);
    assert_eq!(fx.head().1, first[1].hash());
}

#[test]
fn test_lighter_fork_is_stored_but_not_selected() {
    let fx = Fixture::new();
    let (peer, _outbound) = fx.connect();
    let base = Difficulty::BASE_DIFFICULTY;

    let genesis = header(Sha256Hash::EMPTY, 0, base);
    let main = chain(genesis.hash(), 5, 10, base);
    fx.sync
        .process_headers(peer, &[vec![genesis.clone()], main.clone()].concat())
        .unwrap();
    let stored_before = fx.db.header_count();

    let fork = chain(genesis.hash(), 2, 50, base);
    let outcome = fx.sync.process_headers(peer, &fork).unwrap();
    assert!(!outcome.head_moved);
    assert_eq!(fx.db.header_count(), stored_before + 2);
    assert_eq!(fx.head().0, 5);
}

#[test]
fn test_resent_headers_are_already_known() {
    let fx = Fixture::new();
    let (peer, _outbound) = fx.connect();
    let headers = chain(Sha256Hash::EMPTY, 3, 0, Difficulty::BASE_DIFFICULTY);

    fx.sync.process_headers(peer, &headers).unwrap();
    let outcome = fx.sync.process_headers(peer, &headers).unwrap();
    assert_eq!(outcome.accepted, 0);
    assert_eq!(outcome.already_known, 3);
    assert!(!outcome.head_moved);
}

#[test]
fn test_unknown_parent_is_rejected() {
    let fx = Fixture::new();
    let (peer, _outbound) = fx.connect();
    let orphan = chain(Sha256Hash::digest(b"nowhere"), 2, 0, Difficulty::BASE_DIFFICULTY);

    let result = fx.sync.process_headers(peer, &orphan);
    assert!(matches!(result, Err(Error::Sync(_))));
    assert_eq!(fx.db.header_count(), 0);
}

#[test]
fn test_non_contiguous_batch_is_rejected() {
    let fx = Fixture::new();
    let (peer, _outbound) = fx.connect();
    let mut headers = chain(Sha256Hash::EMPTY, 3, 0, Difficulty::BASE_DIFFICULTY);
    headers.swap(1, 2);

    assert!(matches!(
        fx.sync.process_headers(peer, &headers),
        Err(Error::Sync(_))
    ));
}

#[test]
fn test_request_sends_locator_of_best_chain() {
    let fx = Fixture::new();
    let (peer, mut outbound) = fx.connect();
    let headers = chain(Sha256Hash::EMPTY, 15, 0, Difficulty::BASE_DIFFICULTY);
    fx.sync.process_headers(peer, &headers).unwrap();

    fx.sync.request_headers(peer).unwrap();
    let message = outbound.try_recv().unwrap();
    assert_eq!(message.command, MessageType::GetHeaders);
    let request = GetHeaders::decode(&message.payload).unwrap();
    assert_eq!(request.locator.first(), Some(&headers[14].hash()));
    assert_eq!(request.locator.last(), Some(&headers[0].hash()));
    assert_eq!(request.stop_hash, Sha256Hash::EMPTY);
}

#[test]
fn test_single_request_in_flight_per_peer() {
    let fx = Fixture::new();
    let (peer, mut outbound) = fx.connect();

    let first = fx.sync.request_headers(peer).unwrap();
    let second = fx.sync.request_headers(peer).unwrap();
    assert_eq!(first, second);
    assert!(outbound.try_recv().is_ok());
    assert!(outbound.try_recv().is_err());
    assert_eq!(fx.tracker.pending_count(), 1);
}

#[test]
fn test_concurrent_requests_send_once() {
    let fx = Fixture::new();
    let (peer, mut outbound) = fx.connect();

    let ids: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| fx.sync.request_headers(peer).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(ids.iter().all(|id| *id == ids[0]));
    assert!(outbound.try_recv().is_ok());
    assert!(outbound.try_recv().is_err());
    assert_eq!(fx.tracker.pending_count(), 1);
}

#[test]
fn test_answer_completes_request() {
    let fx = Fixture::new();
    let (peer, _outbound) = fx.connect();
    fx.sync.request_headers(peer).unwrap();
    assert!(fx.sync.has_request_in_flight(peer));

    let headers = chain(Sha256Hash::EMPTY, 2, 0, Difficulty::BASE_DIFFICULTY);
    fx.sync.process_headers(peer, &headers).unwrap();
    assert!(!fx.sync.has_request_in_flight(peer));
    assert_eq!(fx.tracker.pending_count(), 0);
    assert_eq!(fx.status.state(), SyncState::Synchronized);
}

#[test]
fn test_silent_peer_stalls() {
    let fx = Fixture::new();
    let (peer, _outbound) = fx.connect();
    fx.sync.request_headers(peer).unwrap();

    fx.clock.advance_ms(STALL_WINDOW.as_millis() as u64 - 1);
    assert_eq!(fx.tracker.check_stalls(|p| fx.peers.bytes_received(p)), 0);
    assert!(fx.sync.has_request_in_flight(peer));

    fx.clock.advance_ms(1);
    assert_eq!(fx.tracker.check_stalls(|p| fx.peers.bytes_received(p)), 1);
    assert!(!fx.sync.has_request_in_flight(peer));

    // The peer may be asked again after a stall
    fx.sync.request_headers(peer).unwrap();
    assert!(fx.sync.has_request_in_flight(peer));
}

#[test]
fn test_trickling_peer_does_not_stall() {
    let fx = Fixture::new();
    let (peer, _outbound) = fx.connect();
    fx.sync.request_headers(peer).unwrap();

    for _ in 0..5 {
        fx.clock.advance_ms(STALL_WINDOW.as_millis() as u64);
        fx.peers.record_bytes_received(peer, 24);
        assert_eq!(fx.tracker.check_stalls(|p| fx.peers.bytes_received(p)), 0);
    }
    assert!(fx.sync.has_request_in_flight(peer));
}

#[tokio::test]
async fn test_processing_on_pool() {
    let fx = Fixture::new();
    let (peer, _outbound) = fx.connect();
    let headers = chain(Sha256Hash::EMPTY, 4, 0, Difficulty::BASE_DIFFICULTY);

    let outcome = Arc::clone(&fx.sync)
        .process_headers_on_pool(peer, headers.clone())
        .await
        .unwrap();
    assert_eq!(outcome.accepted, 4);
    assert_eq!(outcome.head.map(|h| h.hash), Some(headers[3].hash()));
    assert_eq!(fx.status.current_height(), 3);
}
