//! Per-peer connection loop
//!
//! One task per connection reads frames in arrival order, dispatches each to
//! the component that owns its command, and writes whatever the registry has
//! queued for the peer. A checksum mismatch drops one message; a frame from
//! the wrong network or a malformed frame ends the connection.
//!
//! Received bytes are credited to the peer as they are read off the stream,
//! so the stall watchdog sees progress inside a large frame.

use crate::core::InventoryKind;
use crate::error::{Error, Result};
use crate::log_peer_event;
use crate::peer::counting::CountingStream;
use crate::peer::{BloomFilter, ConnectedPeers, PeerId, PeerRegistry};
use crate::protocol::payload::{
    FilterLoad, MAX_HEADERS_PER_MESSAGE, VersionMessage, decode_headers, decode_inventory,
    encode_inventory,
};
use crate::protocol::{FrameCodec, Message, MessageType, NetworkMagic, ProtocolFrame};
use crate::relay::MempoolRelayResponder;
use crate::storage::BlockStore;
use crate::sync::{HeaderSync, NetworkAdjustedClock};
use crate::utils::logging::LogContext;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{Instrument, Level, debug, warn};

/// Components a connection dispatches to
#[derive(Clone)]
pub struct ConnectionHandlers {
    /// Registry the connection registers itself in
    pub peers: Arc<ConnectedPeers>,
    /// Header synchronization
    pub header_sync: Arc<HeaderSync>,
    /// `mempool` responder
    pub mempool: Arc<MempoolRelayResponder>,
    /// Clock fed with the timestamps peers report in `version`
    pub network_time: Arc<NetworkAdjustedClock>,
    /// Source of full blocks for `getdata`; `None` answers everything with `notfound`
    pub blocks: Option<Arc<dyn BlockStore>>,
    /// Send `getheaders` as soon as the peer is registered
    pub request_headers_on_connect: bool,
}

/// Run a peer connection until the peer hangs up or a fatal error occurs
///
/// The peer is registered for the lifetime of the call and unregistered on
/// every exit path.
pub async fn run_connection<S>(
    stream: S,
    magic: NetworkMagic,
    handlers: ConnectionHandlers,
    address: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (peer, outbound) = handlers.peers.register(address);
    let span = LogContext::for_component("connection")
        .with_peer(peer)
        .with_field("address".to_string(), address.to_string())
        .span("peer_connection");

    let stream = CountingStream::new(stream, Arc::clone(&handlers.peers), peer);
    let framed = Framed::new(stream, FrameCodec::new(magic));
    let result = drive(framed, outbound, peer, &handlers).instrument(span).await;

    handlers.peers.unregister(peer);
    handlers.header_sync.peer_disconnected(peer);
    handlers.network_time.remove_sample(peer);
    match &result {
        Ok(()) => log_peer_event!(Level::INFO, peer, "Peer disconnected", address = address),
        Err(e) => log_peer_event!(
            Level::WARN,
            peer,
            "Connection closed with error",
            address = address,
            error = e
        ),
    }
    result
}

async fn drive<S>(
    mut framed: Framed<CountingStream<S>, FrameCodec>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    peer: PeerId,
    handlers: &ConnectionHandlers,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    log_peer_event!(Level::INFO, peer, "Peer connected");
    let requested = handlers
        .request_headers_on_connect
        .then(|| handlers.header_sync.request_headers(peer));
    if let Some(Err(e)) = requested {
        warn!(%peer, error = %e, "Failed to request headers");
    }

    loop {
        tokio::select! {
            item = framed.next() => {
                match item {
                    None => return Ok(()),
                    Some(Err(e)) => return Err(e),
                    Some(Ok(Err(rejected))) => {
                        warn!(%peer, error = %rejected, "Dropping frame");
                    }
                    Some(Ok(Ok(frame))) => {
                        if let Err(e) = handle_frame(peer, frame, handlers).await {
                            if e.is_connection_fatal() {
                                return Err(e);
                            }
                            warn!(%peer, error = %e, "Failed to handle message");
                        }
                    }
                }
            }
            Some(message) = outbound.recv() => {
                debug!(%peer, command = %message.command, bytes = message.payload.len(), "Sending message");
                framed.send(message).await?;
            }
        }
    }
}

async fn handle_frame(peer: PeerId, frame: ProtocolFrame, handlers: &ConnectionHandlers) -> Result<()> {
    let ProtocolFrame { header, payload } = frame;
    let peers = &handlers.peers;

    match header.command {
        MessageType::Ping => peers.send_message(peer, MessageType::Pong, payload),
        MessageType::Version => {
            match VersionMessage::decode(&payload) {
                Ok(version) => {
                    debug!(
                        %peer,
                        version = version.version,
                        user_agent = %version.user_agent,
                        start_height = version.start_height,
                        "Received version"
                    );
                    if let Ok(seconds) = u64::try_from(version.timestamp) {
                        handlers.network_time.add_sample(peer, seconds.saturating_mul(1_000));
                    }
                }
                Err(e) => debug!(%peer, error = %e, "Unreadable version payload"),
            }
            peers.send_message(peer, MessageType::Verack, Bytes::new())
        }
        MessageType::Mempool => {
            handlers.mempool.respond(peer);
            Ok(())
        }
        MessageType::FilterLoad => {
            let filter = BloomFilter::from_filter_load(FilterLoad::decode(&payload)?)?;
            debug!(%peer, bytes = filter.size_bytes(), hash_functions = filter.hash_function_count(), "Bloom filter loaded");
            peers.set_bloom_filter(peer, Some(filter));
            Ok(())
        }
        MessageType::FilterClear => {
            peers.set_bloom_filter(peer, None);
            debug!(%peer, "Bloom filter cleared");
            Ok(())
        }
        MessageType::Headers => {
            let headers = decode_headers(&payload)?;
            let count = headers.len();
            let outcome = Arc::clone(&handlers.header_sync)
                .process_headers_on_pool(peer, headers)
                .await?;
            if count >= MAX_HEADERS_PER_MESSAGE && outcome.accepted > 0 {
                handlers.header_sync.request_headers(peer)?;
            }
            Ok(())
        }
        MessageType::GetData => handle_get_data(peer, &payload, handlers),
        MessageType::Unknown(ref command) => {
            debug!(%peer, command, "Ignoring unknown command");
            Ok(())
        }
        ref command => {
            debug!(%peer, %command, "Ignoring message");
            Ok(())
        }
    }
}

fn handle_get_data(peer: PeerId, payload: &[u8], handlers: &ConnectionHandlers) -> Result<()> {
    let items = decode_inventory(payload)?;
    let peers = &handlers.peers;
    let mut missing = Vec::new();

    for item in items {
        let block = match (&handlers.blocks, item.kind) {
            (Some(store), InventoryKind::Block) => store.get_block(&item.hash, None),
            _ => None,
        };
        match block {
            Some(block) => peers.send_message(peer, MessageType::Block, block.to_bytes())?,
            None => missing.push(item),
        }
    }

    if !missing.is_empty() {
        debug!(%peer, missing = missing.len(), "Answering getdata with notfound");
        let payload = encode_inventory(&missing).map_err(|e| Error::peer(format!("{peer}: {e}")))?;
        peers.send_message(peer, MessageType::NotFound, payload)?;
    }
    Ok(())
}
