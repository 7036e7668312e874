//! In-memory datagram socket for tests

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::common::{Address, Result};
use crate::error::Error;
use crate::transport::PacketConn;

pub(crate) type Inbound = mpsc::UnboundedSender<(Vec<u8>, Address)>;

/// Datagrams pushed on the paired sender arrive through `recv_from`; sends
/// are recorded.
pub(crate) struct MemoryPacketConn {
    local: Address,
    inbound: Mutex<mpsc::UnboundedReceiver<(Vec<u8>, Address)>>,
    sent: parking_lot::Mutex<Vec<(Vec<u8>, Address)>>,
    closed: CancellationToken,
}

impl MemoryPacketConn {
    pub(crate) fn sent(&self) -> Vec<(Vec<u8>, Address)> {
        self.sent.lock().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

pub(crate) fn memory_conn() -> (Arc<MemoryPacketConn>, Inbound) {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = Arc::new(MemoryPacketConn {
        local: "127.0.0.1:7000".parse().unwrap(),
        inbound: Mutex::new(rx),
        sent: parking_lot::Mutex::new(Vec::new()),
        closed: CancellationToken::new(),
    });
    (conn, tx)
}

#[async_trait]
impl PacketConn for MemoryPacketConn {
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address)> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::ConnectionClosed),
            datagram = inbound.recv() => {
                let (payload, from) = datagram.ok_or(Error::ConnectionClosed)?;
                let n = payload.len().min(buf.len());
                buf[..n].copy_from_slice(&payload[..n]);
                Ok((n, from))
            }
        }
    }

    async fn send_to(&self, buf: &[u8], addr: &Address) -> Result<usize> {
        if self.closed.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }
        self.sent.lock().push((buf.to_vec(), addr.clone()));
        Ok(buf.len())
    }

    fn local_addr(&self) -> Result<Address> {
        Ok(self.local.clone())
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        Ok(())
    }
}
