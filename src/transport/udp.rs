//! UDP transport
//!
//! Two shapes of UDP socket are provided:
//! - [`UdpStream`]: a connected socket exposed as a stream, one datagram per
//!   read/write call
//! - [`UdpSocketConn`]: an unconnected socket implementing [`PacketConn`],
//!   the input of the UDP demultiplexer

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::common::{Address, Params, Result, Stream};
use crate::error::Error;

use super::{Dialer, PacketConn};

/// Wildcard local address in the family of `peer`
pub(crate) fn unspecified_for(peer: &SocketAddr) -> SocketAddr {
    match peer {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

/// UDP dialer: a connected socket per dial
#[derive(Debug, Clone, Default)]
pub struct UdpDialer;

impl UdpDialer {
    pub fn new() -> Self {
        Self
    }

    pub fn from_params(_params: &Params) -> Result<Self> {
        Ok(Self)
    }
}

#[async_trait]
impl Dialer for UdpDialer {
    async fn dial(&self, addr: &Address) -> Result<Stream> {
        Ok(Box::new(UdpStream::connect(addr).await?))
    }

    fn name(&self) -> &'static str {
        "udp"
    }
}

/// Connected UDP socket as a stream.
///
/// Each `poll_read` yields exactly one datagram (truncated to the buffer) and
/// each `poll_write` sends exactly one datagram.
pub struct UdpStream {
    socket: UdpSocket,
}

impl UdpStream {
    pub async fn connect(addr: &Address) -> Result<Self> {
        let peer = addr.resolve().await?;
        let socket = UdpSocket::bind(unspecified_for(&peer)).await?;
        socket.connect(peer).await?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<Address> {
        Ok(Address::Socket(self.socket.local_addr()?))
    }
}

impl AsyncRead for UdpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        // An empty datagram would read as end of stream, so it is skipped.
        loop {
            let filled = buf.filled().len();
            ready!(self.socket.poll_recv(cx, buf))?;
            if buf.filled().len() > filled || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }
        }
    }
}

impl AsyncWrite for UdpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.socket.poll_send(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Unconnected UDP socket as a [`PacketConn`].
///
/// `close` cancels any pending `recv_from`; the socket itself is released
/// when the last reference is dropped.
pub struct UdpSocketConn {
    socket: UdpSocket,
    closed: CancellationToken,
}

impl UdpSocketConn {
    pub fn new(socket: UdpSocket) -> Self {
        Self {
            socket,
            closed: CancellationToken::new(),
        }
    }

    pub async fn bind(addr: &Address) -> Result<Self> {
        let local = addr.resolve().await?;
        Ok(Self::new(UdpSocket::bind(local).await?))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl PacketConn for UdpSocketConn {
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address)> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::ConnectionClosed),
            received = self.socket.recv_from(buf) => {
                let (n, peer) = received?;
                Ok((n, Address::Socket(peer)))
            }
        }
    }

    async fn send_to(&self, buf: &[u8], addr: &Address) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let target = addr.resolve().await?;
        Ok(self.socket.send_to(buf, target).await?)
    }

    fn local_addr(&self) -> Result<Address> {
        Ok(Address::Socket(self.socket.local_addr()?))
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        Ok(())
    }
}
