//! Chainsync node
//!
//! Connects to (or accepts) peers, downloads headers, tracks the best chain
//! by cumulative work and answers `mempool` queries until interrupted.

use chainsync::{
    VERSION,
    cache::DatabaseManagerCache,
    config::{Args, Config},
    error::Result,
    peer::{ConnectionHandlers, ConnectedPeers, PeerRegistry, run_connection},
    protocol::NetworkMagic,
    relay::MempoolRelayResponder,
    storage::{DatabaseSessionFactory, InMemoryDatabase},
    sync::{
        Clock, HeaderSync, HeaderSyncContext, NetworkAdjustedClock, StalledRequestTracker,
        SynchronizationStatus, SystemClock, build_validation_pool,
    },
    utils::{self, format_bytes},
};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// Everything a running node shares between its tasks
struct Node {
    magic: NetworkMagic,
    handlers: ConnectionHandlers,
    status: Arc<SynchronizationStatus>,
    tracker: Arc<StalledRequestTracker>,
    cache: Arc<DatabaseManagerCache>,
}

impl Node {
    fn build(config: &Config) -> Result<Self> {
        let magic = config.network_magic()?;
        let database = InMemoryDatabase::new();
        let sessions: Arc<dyn DatabaseSessionFactory> = Arc::new(database.clone());
        let peers = Arc::new(ConnectedPeers::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let pool = build_validation_pool(config.sync.worker_threads)?;
        info!(threads = pool.current_num_threads(), "Validation pool ready");

        let network_time = Arc::new(NetworkAdjustedClock::new(Arc::clone(&clock)));
        let context = HeaderSyncContext::new(
            peers.clone(),
            Arc::clone(&sessions),
            network_time.clone(),
            Arc::clone(&clock),
            Arc::new(pool),
        );
        let tracker = Arc::new(StalledRequestTracker::new(
            Arc::clone(&clock),
            config.stall_window(),
        ));
        let status = Arc::new(SynchronizationStatus::new(Arc::clone(&sessions), clock));
        let header_sync = Arc::new(HeaderSync::new(
            context,
            Arc::clone(&tracker),
            Arc::clone(&status),
        ));
        let mempool = Arc::new(MempoolRelayResponder::new(sessions, peers.clone()));

        Ok(Self {
            magic,
            handlers: ConnectionHandlers {
                peers,
                header_sync,
                mempool,
                network_time,
                blocks: Some(Arc::new(database)),
                request_headers_on_connect: config.sync.request_headers_on_connect,
            },
            status,
            tracker,
            cache: Arc::new(DatabaseManagerCache::new(config.cache.max_cached_utxo_count)),
        })
    }

    fn spawn_connection(&self, stream: TcpStream, address: String) {
        let handlers = self.handlers.clone();
        let magic = self.magic;
        tokio::spawn(async move {
            if let Err(e) = run_connection(stream, magic, handlers, &address).await {
                warn!(address = %address, error = %e, "Connection ended");
            }
        });
    }

    fn spawn_watchdog(&self, period: Duration) {
        let peers = Arc::clone(&self.handlers.peers);
        tokio::spawn(
            Arc::clone(&self.tracker).run_watchdog(period, move |peer| peers.bytes_received(peer)),
        );
    }

    fn spawn_status_reporter(&self) {
        let status = Arc::clone(&self.status);
        let peers = Arc::clone(&self.handlers.peers);
        let tracker = Arc::clone(&self.tracker);
        tokio::spawn(async move {
            let mut ticker = interval(STATUS_INTERVAL);
            loop {
                ticker.tick().await;
                let snapshot = peers.snapshot();
                let received: u64 = snapshot.iter().map(|p| p.bytes_received).sum();
                info!(
                    state = %status.state(),
                    height = status.current_height(),
                    ready_for_transactions = status.is_ready_for_transactions(),
                    peers = peers.len(),
                    pending_requests = tracker.pending_count(),
                    received = %format_bytes(received),
                    "Sync status"
                );
                match serde_json::to_string(&snapshot) {
                    Ok(json) => debug!(peers = %json, "Peer snapshot"),
                    Err(e) => warn!(error = %e, "Failed to serialize peer snapshot"),
                }
            }
        });
    }

    fn shutdown(&self) {
        self.tracker.shutdown();
        let counts = self.cache.commit();
        self.cache.close();
        info!(
            height = self.status.current_height(),
            cached_entries = counts.total(),
            "Node stopped"
        );
    }
}

async fn accept_loop(node: &Node, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, address)) => {
                info!(%address, "Accepted peer connection");
                node.spawn_connection(stream, address.to_string());
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let print_config = args.print_config;
    let config = Config::from_args(args)?;

    if print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    utils::logging::init_structured_logging(
        &config.logging.level,
        &config.logging.format,
        config.logging.include_target,
    );

    let node = Node::build(&config)?;
    info!(version = VERSION, network = %node.magic, "Starting chainsync");

    node.spawn_watchdog(config.watchdog_interval());
    node.spawn_status_reporter();

    if let Some(address) = &config.network.connect {
        let stream = TcpStream::connect(address).await?;
        info!(%address, "Connected to peer");
        node.spawn_connection(stream, address.clone());
    }

    match &config.network.listen {
        Some(address) => {
            let listener = TcpListener::bind(address).await?;
            info!(%address, "Listening for peers");
            tokio::select! {
                _ = accept_loop(&node, listener) => {}
                _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
            }
        }
        None => {
            if config.network.connect.is_none() {
                warn!("Neither listen nor connect is configured; waiting for shutdown");
            }
            tokio::signal::ctrl_c().await?;
            info!("Received shutdown signal");
        }
    }

    node.shutdown();
    Ok(())
}
