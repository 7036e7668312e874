//! Stream connection with fixed endpoint addresses

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::common::{Address, Stream};

/// A peer connection handed back by a bind listener.
///
/// The underlying transport is opaque; `local_addr` reports the bound
/// address and `peer_addr` the peer the remote listener accepted.
pub struct BoundConn {
    stream: Stream,
    local: Address,
    peer: Address,
}

impl BoundConn {
    pub fn new(stream: Stream, local: Address, peer: Address) -> Self {
        Self { stream, local, peer }
    }

    pub fn local_addr(&self) -> &Address {
        &self.local
    }

    pub fn peer_addr(&self) -> &Address {
        &self.peer
    }

    pub fn into_inner(self) -> Stream {
        self.stream
    }
}

impl std::fmt::Debug for BoundConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundConn")
            .field("local", &self.local)
            .field("peer", &self.peer)
            .finish()
    }
}

impl AsyncRead for BoundConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for BoundConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
