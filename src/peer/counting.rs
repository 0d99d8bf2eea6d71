//! Byte accounting on the raw connection stream

use crate::peer::{ConnectedPeers, PeerId};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Stream wrapper that credits every byte read to the peer's counter
///
/// Bytes count as they arrive, before any framing, so a frame still in
/// transit or one rejected by the codec advances the counter too.
pub(crate) struct CountingStream<S> {
    inner: S,
    peers: Arc<ConnectedPeers>,
    peer: PeerId,
}

impl<S> CountingStream<S> {
    pub(crate) fn new(inner: S, peers: Arc<ConnectedPeers>, peer: PeerId) -> Self {
        Self { inner, peers, peer }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CountingStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        let read = buf.filled().len() - before;
        if read > 0 {
            self.peers.record_bytes_received(self.peer, read);
        }
        result
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CountingStream<S> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    #[tokio::test]
    async fn test_counts_bytes_as_read() {
        let peers = Arc::new(ConnectedPeers::new());
        let (peer, _outbound) = peers.register("peer");
        let (mut local, remote) = duplex(64);
        let mut counted = CountingStream::new(remote, Arc::clone(&peers), peer);

        local.write_all(&[7u8; 10]).await.unwrap();
        let mut buf = [0u8; 4];
        counted.read_exact(&mut buf).await.unwrap();
        assert_eq!(peers.get(peer).unwrap().bytes_received(), 4);

        let mut rest = [0u8; 6];
        counted.read_exact(&mut rest).await.unwrap();
        assert_eq!(peers.get(peer).unwrap().bytes_received(), 10);
    }
}
