//! Reverse accept over a single tunnel

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::common::{Address, Result, Stream};
use crate::error::Error;
use crate::transport::Listener;

use super::BoundConn;

/// Protocol-specific decoder for the "peer connected" reply of a BIND.
#[async_trait]
pub trait PeerReply: Send + Sync {
    /// Block until the proxy announces a peer; return its address.
    async fn read_peer(&self, stream: &mut Stream) -> Result<Address>;
}

/// Listener over a tunnel whose first reply to BIND has been read.
///
/// The tunnel carries exactly one peer: the first `accept` yields it, later
/// calls report `Error::ListenerClosed`.
pub struct StreamBindListener {
    stream: Mutex<Option<Stream>>,
    local: Address,
    reply: Arc<dyn PeerReply>,
    closed: CancellationToken,
}

impl StreamBindListener {
    pub fn new(stream: Stream, local: Address, reply: Arc<dyn PeerReply>) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
            local,
            reply,
            closed: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Listener for StreamBindListener {
    type Conn = BoundConn;

    async fn accept(&self) -> Result<BoundConn> {
        let mut slot = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(Error::ListenerClosed),
            slot = self.stream.lock() => slot,
        };
        let mut stream = slot.take().ok_or(Error::ListenerClosed)?;
        drop(slot);

        let peer = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(Error::ListenerClosed),
            peer = self.reply.read_peer(&mut stream) => peer?,
        };

        debug!("bind {}: accepted peer {}", self.local, peer);
        Ok(BoundConn::new(stream, self.local.clone(), peer))
    }

    fn local_addr(&self) -> Result<Address> {
        Ok(self.local.clone())
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        if let Ok(mut slot) = self.stream.try_lock() {
            slot.take();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Peer announcement encoded as a bare binary address
    struct AddressReply;

    #[async_trait]
    impl PeerReply for AddressReply {
        async fn read_peer(&self, stream: &mut Stream) -> Result<Address> {
            Address::read_from(stream).await
        }
    }

    fn bound() -> Address {
        "203.0.113.7:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_accept_reports_bound_and_peer() {
        let (client, mut remote) = tokio::io::duplex(1024);
        let listener = StreamBindListener::new(Box::new(client), bound(), Arc::new(AddressReply));

        let peer: Address = "198.51.100.2:51000".parse().unwrap();
        let mut announce = Vec::new();
        peer.write_to(&mut announce).unwrap();
        announce.extend_from_slice(b"hello");
        remote.write_all(&announce).await.unwrap();

        let mut conn = listener.accept().await.unwrap();
        assert_eq!(conn.local_addr(), &bound());
        assert_eq!(conn.peer_addr(), &peer);

        let mut buf = [0u8; 5];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        assert!(matches!(listener.accept().await, Err(Error::ListenerClosed)));
    }

    #[tokio::test]
    async fn test_close_interrupts_pending_accept() {
        let (client, _remote) = tokio::io::duplex(1024);
        let listener = Arc::new(StreamBindListener::new(
            Box::new(client),
            bound(),
            Arc::new(AddressReply),
        ));

        let pending = {
            let listener = Arc::clone(&listener);
            tokio::spawn(async move { listener.accept().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        listener.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), pending).await.unwrap().unwrap();
        assert!(matches!(result, Err(Error::ListenerClosed)));
        assert!(matches!(listener.accept().await, Err(Error::ListenerClosed)));
    }

    #[tokio::test]
    async fn test_failed_reply_surfaces_error() {
        let (client, mut remote) = tokio::io::duplex(1024);
        let listener = StreamBindListener::new(Box::new(client), bound(), Arc::new(AddressReply));

        remote.write_all(&[0x09]).await.unwrap();
        assert!(matches!(listener.accept().await, Err(Error::Protocol(_))));
    }
}
