//! Per-peer pseudo-connection

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::common::{bufpool, Address, Result};
use crate::error::Error;
use crate::transport::PacketConn;

/// One remote peer multiplexed over a shared [`PacketConn`].
///
/// Cloning yields another handle to the same pseudo-connection. Reads come
/// from the demultiplexer's queue; writes go straight to the shared socket.
#[derive(Clone)]
pub struct UdpConn {
    inner: Arc<ConnInner>,
}

struct ConnInner {
    conn: Arc<dyn PacketConn>,
    local: Address,
    peer: Address,
    tx: mpsc::Sender<Vec<u8>>,
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    idle: AtomicBool,
    closed: CancellationToken,
    keep_alive: bool,
}

impl UdpConn {
    pub(crate) fn new(
        conn: Arc<dyn PacketConn>,
        local: Address,
        peer: Address,
        queue_size: usize,
        keep_alive: bool,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        Self {
            inner: Arc::new(ConnInner {
                conn,
                local,
                peer,
                tx,
                rx: Mutex::new(rx),
                idle: AtomicBool::new(false),
                closed: CancellationToken::new(),
                keep_alive,
            }),
        }
    }

    pub fn local_addr(&self) -> &Address {
        &self.inner.local
    }

    pub fn peer_addr(&self) -> &Address {
        &self.inner.peer
    }

    /// Receive the next datagram from the peer, truncated to `buf`.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let closed = &self.inner.closed;
        let mut rx = tokio::select! {
            biased;
            _ = closed.cancelled() => return Err(Error::ConnectionClosed),
            rx = self.inner.rx.lock() => rx,
        };

        tokio::select! {
            biased;
            _ = closed.cancelled() => Err(Error::ConnectionClosed),
            payload = rx.recv() => {
                let payload = payload.ok_or(Error::ConnectionClosed)?;
                let n = payload.len().min(buf.len());
                buf[..n].copy_from_slice(&payload[..n]);
                self.inner.idle.store(false, Ordering::Release);
                bufpool::put(payload);
                Ok(n)
            }
        }
    }

    /// Like [`UdpConn::recv`], also reporting the (fixed) peer address.
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address)> {
        let n = self.recv(buf).await?;
        Ok((n, self.inner.peer.clone()))
    }

    /// Send one datagram to the peer through the shared socket.
    pub async fn send(&self, buf: &[u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let n = self.inner.conn.send_to(buf, &self.inner.peer).await?;
        if !self.inner.keep_alive {
            self.close();
        }
        Ok(n)
    }

    /// Close this pseudo-connection. The shared socket stays open.
    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.inner.idle.load(Ordering::Acquire)
    }

    pub(crate) fn set_idle(&self, idle: bool) {
        self.inner.idle.store(idle, Ordering::Release);
    }

    /// Queue a payload for the reader without waiting.
    pub(crate) fn enqueue(&self, payload: Vec<u8>) -> Result<()> {
        if self.is_closed() {
            bufpool::put(payload);
            return Err(Error::ConnectionClosed);
        }
        match self.inner.tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(payload)) => {
                bufpool::put(payload);
                Err(Error::QueueFull)
            }
            Err(TrySendError::Closed(payload)) => {
                bufpool::put(payload);
                Err(Error::ConnectionClosed)
            }
        }
    }
}

impl std::fmt::Debug for UdpConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpConn")
            .field("local", &self.inner.local)
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::udp::testing::memory_conn;

    fn peer() -> Address {
        "192.0.2.10:5000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_recv_truncates_and_clears_idle() {
        let (socket, _inbound) = memory_conn();
        let conn = UdpConn::new(socket, Address::unspecified(), peer(), 4, true);

        conn.enqueue(b"abcdef".to_vec()).unwrap();
        conn.set_idle(true);

        let mut buf = [0u8; 4];
        assert_eq!(conn.recv(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert!(!conn.is_idle());
    }

    #[tokio::test]
    async fn test_enqueue_drops_when_full() {
        let (socket, _inbound) = memory_conn();
        let conn = UdpConn::new(socket, Address::unspecified(), peer(), 1, true);

        conn.enqueue(b"1".to_vec()).unwrap();
        assert!(matches!(conn.enqueue(b"2".to_vec()), Err(Error::QueueFull)));

        conn.close();
        assert!(matches!(conn.enqueue(b"3".to_vec()), Err(Error::ConnectionClosed)));
        let mut buf = [0u8; 4];
        assert!(matches!(conn.recv(&mut buf).await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_one_shot_closes_after_send() {
        let (socket, _inbound) = memory_conn();
        let conn = UdpConn::new(socket.clone(), Address::unspecified(), peer(), 1, false);

        assert_eq!(conn.send(b"answer").await.unwrap(), 6);
        assert!(conn.is_closed());
        assert!(matches!(conn.send(b"again").await, Err(Error::ConnectionClosed)));
        assert_eq!(socket.sent(), vec![(b"answer".to_vec(), peer())]);
    }
}
