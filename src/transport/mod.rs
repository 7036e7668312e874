//! Transport Layer
//!
//! Responsibilities:
//! - Open the lowest-level connection to a proxy node (TCP, UDP)
//! - Optional transport handshake on top of it (TLS)
//! - Datagram socket and listener abstractions shared with the UDP core
//!
//! NO proxy protocol parsing happens here; that is the protocol layer.

mod tcp;
mod tls;
mod udp;

pub use tcp::{LocalTcpListener, TcpDialer};
pub use tls::TlsDialer;
pub use udp::{UdpDialer, UdpSocketConn, UdpStream};

use std::sync::Arc;

use async_trait::async_trait;

use crate::chain::Registry;
use crate::common::{Address, Params, Result, Stream};

/// Transport dialer for one node.
///
/// `dial` reaches the node directly; `handshake` runs over any stream that
/// leads to the node, including one tunneled through earlier hops.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a transport connection to `addr`
    async fn dial(&self, addr: &Address) -> Result<Stream>;

    /// Transport-level negotiation. Consumes `stream`, so a failure closes it.
    async fn handshake(&self, stream: Stream, _addr: &Address) -> Result<Stream> {
        Ok(stream)
    }

    /// Whether one dial + handshake can carry many logical streams
    fn is_multiplex(&self) -> bool {
        false
    }

    /// Get transport name
    fn name(&self) -> &'static str;
}

/// Datagram socket, possibly tunneled through a proxy.
///
/// Implementations must allow concurrent `send_to` calls from many tasks.
#[async_trait]
pub trait PacketConn: Send + Sync {
    /// Receive one datagram; oversized payloads are truncated
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address)>;

    /// Send one datagram to `addr`
    async fn send_to(&self, buf: &[u8], addr: &Address) -> Result<usize>;

    /// Get the local bound address
    fn local_addr(&self) -> Result<Address>;

    /// Close the socket, unblocking a pending `recv_from`. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Listener trait for accepting incoming connections
#[async_trait]
pub trait Listener: Send + Sync {
    type Conn: Send + 'static;

    /// Accept a new connection; `Error::ListenerClosed` once closed
    async fn accept(&self) -> Result<Self::Conn>;

    /// Get the local bound address
    fn local_addr(&self) -> Result<Address>;

    /// Close the listener. Idempotent.
    async fn close(&self) -> Result<()>;
}

fn new_tcp(params: &Params) -> Result<Arc<dyn Dialer>> {
    Ok(Arc::new(TcpDialer::from_params(params)?))
}

fn new_udp(params: &Params) -> Result<Arc<dyn Dialer>> {
    Ok(Arc::new(UdpDialer::from_params(params)?))
}

fn new_tls(params: &Params) -> Result<Arc<dyn Dialer>> {
    Ok(Arc::new(TlsDialer::from_params(params)?))
}

/// Register the built-in transports
pub fn register(registry: &mut Registry) {
    registry.register_dialer("tcp", new_tcp);
    registry.register_dialer("udp", new_udp);
    registry.register_dialer("tls", new_tls);
}
