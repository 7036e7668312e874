//! Demultiplexing listener over a shared datagram socket

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::common::{bufpool, Address, Result};
use crate::error::Error;
use crate::transport::PacketConn;

use super::pool::ConnPool;
use super::{ListenerConfig, UdpConn};

/// Accepts one [`UdpConn`] per remote peer seen on a shared socket.
///
/// Creating the listener spawns its receive loop and idle sweep on the
/// current tokio runtime. Closing (or dropping) it closes the shared socket
/// and every pseudo-connection.
pub struct UdpListener {
    inner: Arc<ListenerInner>,
}

struct ListenerInner {
    conn: Arc<dyn PacketConn>,
    local: Address,
    config: ListenerConfig,
    pool: ConnPool,
    accept_tx: mpsc::Sender<UdpConn>,
    accept_rx: Mutex<mpsc::Receiver<UdpConn>>,
    closed: CancellationToken,
}

impl UdpListener {
    pub fn new(conn: Arc<dyn PacketConn>, config: ListenerConfig) -> Result<Self> {
        if config.ttl.is_zero() {
            return Err(Error::Config("udp listener ttl must be positive".into()));
        }
        let local = conn.local_addr()?;
        let (accept_tx, accept_rx) = mpsc::channel(config.backlog.max(1));

        let inner = Arc::new(ListenerInner {
            conn,
            local,
            config,
            pool: ConnPool::new(),
            accept_tx,
            accept_rx: Mutex::new(accept_rx),
            closed: CancellationToken::new(),
        });

        debug!(
            "udp listener on {} (backlog: {}, queue: {}, ttl: {:?})",
            inner.local, inner.config.backlog, inner.config.read_queue_size, inner.config.ttl
        );

        tokio::spawn(Arc::clone(&inner).receive_loop());
        tokio::spawn(Arc::clone(&inner).idle_loop());

        Ok(Self { inner })
    }

    /// Wait for the next new peer
    pub async fn accept(&self) -> Result<UdpConn> {
        let closed = &self.inner.closed;
        let mut accept_rx = tokio::select! {
            biased;
            _ = closed.cancelled() => return Err(Error::ListenerClosed),
            rx = self.inner.accept_rx.lock() => rx,
        };

        tokio::select! {
            biased;
            _ = closed.cancelled() => Err(Error::ListenerClosed),
            conn = accept_rx.recv() => conn.ok_or(Error::ListenerClosed),
        }
    }

    pub fn local_addr(&self) -> Result<Address> {
        Ok(self.inner.local.clone())
    }

    /// Number of live peers in the table
    pub fn peer_count(&self) -> usize {
        self.inner.pool.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    pub async fn close(&self) -> Result<()> {
        self.inner.shutdown().await;
        Ok(())
    }
}

impl Drop for UdpListener {
    fn drop(&mut self) {
        // The receive loop observes the cancellation and finishes teardown.
        self.inner.closed.cancel();
    }
}

impl ListenerInner {
    async fn receive_loop(self: Arc<Self>) {
        loop {
            let mut buf = bufpool::get(self.config.read_buffer_size);

            let received = tokio::select! {
                biased;
                _ = self.closed.cancelled() => {
                    bufpool::put(buf);
                    break;
                }
                received = self.conn.recv_from(&mut buf) => received,
            };

            match received {
                Ok((n, peer)) => {
                    buf.truncate(n);
                    self.dispatch(peer, buf);
                }
                Err(e) => {
                    bufpool::put(buf);
                    if !self.closed.is_cancelled() {
                        warn!("udp listener {}: receive failed: {}", self.local, e);
                    }
                    break;
                }
            }
        }

        self.shutdown().await;
        debug!("udp listener {} closed", self.local);
    }

    fn dispatch(&self, peer: Address, payload: Vec<u8>) {
        let key = peer.to_string();

        let conn = self.pool.get_or_create(&key, || {
            let conn = UdpConn::new(
                Arc::clone(&self.conn),
                self.local.clone(),
                peer,
                self.config.read_queue_size,
                self.config.keep_alive,
            );
            match self.accept_tx.try_send(conn.clone()) {
                Ok(()) => {
                    debug!("udp listener {}: new peer {}", self.local, key);
                    Some(conn)
                }
                Err(_) => {
                    conn.close();
                    warn!("udp listener {}: accept queue is full, peer {} discarded", self.local, key);
                    None
                }
            }
        });

        let Some(conn) = conn else {
            bufpool::put(payload);
            return;
        };

        trace!("udp listener {}: {} bytes from {}", self.local, payload.len(), key);
        if let Err(e) = conn.enqueue(payload) {
            warn!("udp listener {}: datagram from {} discarded: {}", self.local, key, e);
        }
    }

    async fn idle_loop(self: Arc<Self>) {
        let ttl = self.config.ttl;
        let mut ticker = interval_at(Instant::now() + ttl, ttl);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => return,
                _ = ticker.tick() => {
                    let (size, evicted) = self.pool.sweep();
                    if evicted > 0 {
                        debug!("udp listener {}: peers={}, evicted={}", self.local, size, evicted);
                    }
                }
            }
        }
    }

    async fn shutdown(&self) {
        self.closed.cancel();
        if let Err(e) = self.conn.close().await {
            debug!("udp listener {}: close socket: {}", self.local, e);
        }
        self.pool.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::udp::testing::{memory_conn, Inbound, MemoryPacketConn};

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn listener_with(config: ListenerConfig) -> (UdpListener, Arc<MemoryPacketConn>, Inbound) {
        let (socket, inbound) = memory_conn();
        let listener = UdpListener::new(socket.clone(), config).unwrap();
        (listener, socket, inbound)
    }

    /// Let the receive loop drain everything already sent
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn recv_string(conn: &UdpConn) -> String {
        let mut buf = [0u8; 64];
        let n = conn.recv(&mut buf).await.unwrap();
        String::from_utf8(buf[..n].to_vec()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_peer_single_conn_in_order() {
        let (listener, _socket, inbound) = listener_with(ListenerConfig::default());
        let peer = addr("10.0.0.1:1000");

        inbound.send((b"first".to_vec(), peer.clone())).unwrap();
        inbound.send((b"second".to_vec(), peer.clone())).unwrap();

        let conn = listener.accept().await.unwrap();
        assert_eq!(conn.peer_addr(), &peer);
        assert_eq!(conn.local_addr(), &addr("127.0.0.1:7000"));
        assert_eq!(recv_string(&conn).await, "first");
        assert_eq!(recv_string(&conn).await, "second");

        settle().await;
        assert_eq!(listener.peer_count(), 1);
        assert!(tokio::time::timeout(Duration::from_millis(100), listener.accept())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_peers_get_distinct_conns() {
        let (listener, socket, inbound) = listener_with(ListenerConfig::default());

        inbound.send((b"a".to_vec(), addr("10.0.0.1:1000"))).unwrap();
        inbound.send((b"b".to_vec(), addr("10.0.0.2:1000"))).unwrap();

        let a = listener.accept().await.unwrap();
        let b = listener.accept().await.unwrap();
        assert_eq!(recv_string(&a).await, "a");
        assert_eq!(recv_string(&b).await, "b");

        b.send(b"pong").await.unwrap();
        assert_eq!(socket.sent(), vec![(b"pong".to_vec(), addr("10.0.0.2:1000"))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_full_drops_new_peer() {
        let config = ListenerConfig {
            backlog: 1,
            ..Default::default()
        };
        let (listener, _socket, inbound) = listener_with(config);
        let first = addr("10.0.0.1:1000");

        inbound.send((b"from-first".to_vec(), first.clone())).unwrap();
        inbound.send((b"from-second".to_vec(), addr("10.0.0.2:1000"))).unwrap();
        settle().await;

        let conn = listener.accept().await.unwrap();
        assert_eq!(conn.peer_addr(), &first);
        assert!(tokio::time::timeout(Duration::from_millis(100), listener.accept())
            .await
            .is_err());
        assert_eq!(listener.peer_count(), 1);

        // The receive loop kept running.
        inbound.send((b"still-alive".to_vec(), first.clone())).unwrap();
        assert_eq!(recv_string(&conn).await, "from-first");
        let next = tokio::time::timeout(Duration::from_millis(100), recv_string(&conn))
            .await
            .unwrap();
        assert_eq!(next, "still-alive");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_queue_full_drops_datagrams() {
        let config = ListenerConfig {
            read_queue_size: 2,
            ..Default::default()
        };
        let (listener, _socket, inbound) = listener_with(config);
        let peer = addr("10.0.0.1:1000");

        for payload in ["1", "2", "3", "4"] {
            inbound.send((payload.as_bytes().to_vec(), peer.clone())).unwrap();
        }
        settle().await;

        let conn = listener.accept().await.unwrap();
        assert_eq!(recv_string(&conn).await, "1");
        assert_eq!(recv_string(&conn).await, "2");
        assert!(tokio::time::timeout(Duration::from_millis(100), recv_string(&conn))
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_eviction_with_grace_tick() {
        let config = ListenerConfig {
            ttl: Duration::from_secs(1),
            ..Default::default()
        };
        let (listener, _socket, inbound) = listener_with(config);
        let quiet = addr("10.0.0.1:1000");
        let busy = addr("10.0.0.2:1000");

        inbound.send((b"q".to_vec(), quiet.clone())).unwrap();
        inbound.send((b"b".to_vec(), busy.clone())).unwrap();
        let quiet_conn = listener.accept().await.unwrap();
        let busy_conn = listener.accept().await.unwrap();
        recv_string(&quiet_conn).await;
        recv_string(&busy_conn).await;

        // t = 1.5s: both were marked idle at 1s; the busy peer reads again.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!quiet_conn.is_closed());
        inbound.send((b"b2".to_vec(), busy.clone())).unwrap();
        assert_eq!(recv_string(&busy_conn).await, "b2");

        // t = 2.5s: the quiet peer was evicted at 2s, the busy one survived.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(quiet_conn.is_closed());
        assert!(!busy_conn.is_closed());
        assert_eq!(listener.peer_count(), 1);
        let mut buf = [0u8; 8];
        assert!(matches!(quiet_conn.recv(&mut buf).await, Err(Error::ConnectionClosed)));

        // t = 3.5s: without further reads the busy peer goes too.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(busy_conn.is_closed());
        assert_eq!(listener.peer_count(), 0);

        // A returning peer is accepted as a new pseudo-connection.
        inbound.send((b"back".to_vec(), quiet.clone())).unwrap();
        let again = listener.accept().await.unwrap();
        assert_eq!(again.peer_addr(), &quiet);
        assert_eq!(recv_string(&again).await, "back");
    }

    #[tokio::test]
    async fn test_zero_ttl_is_rejected() {
        let (socket, _inbound) = memory_conn();
        let config = ListenerConfig {
            ttl: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(UdpListener::new(socket, config), Err(Error::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_tears_everything_down() {
        let (listener, socket, inbound) = listener_with(ListenerConfig::default());

        inbound.send((b"x".to_vec(), addr("10.0.0.1:1000"))).unwrap();
        let conn = listener.accept().await.unwrap();

        listener.close().await.unwrap();
        listener.close().await.unwrap();

        assert!(listener.is_closed());
        assert!(socket.is_closed());
        assert!(conn.is_closed());
        assert_eq!(listener.peer_count(), 0);
        assert!(matches!(listener.accept().await, Err(Error::ListenerClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_error_closes_listener() {
        let (listener, socket, inbound) = listener_with(ListenerConfig::default());
        inbound.send((b"x".to_vec(), addr("10.0.0.1:1000"))).unwrap();
        let conn = listener.accept().await.unwrap();

        // Dropping the sender makes recv_from fail.
        drop(inbound);
        settle().await;

        assert!(listener.is_closed());
        assert!(socket.is_closed());
        assert!(conn.is_closed());
        assert!(matches!(listener.accept().await, Err(Error::ListenerClosed)));
    }
}
