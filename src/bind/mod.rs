//! Bind / reverse accept
//!
//! A BIND asks the last hop to listen on its side and hand peers back through
//! the tunnel. The result is surfaced as a local [`Listener`]:
//! - TCP: [`StreamBindListener`] waits for the proxy's asynchronous second
//!   reply announcing the peer, then yields the tunnel as a [`BoundConn`]
//! - UDP: the tunnel is adapted into a `PacketConn` and served by the same
//!   demultiplexer as local UDP listening ([`UdpListener`])

mod conn;
mod stream;

pub use conn::BoundConn;
pub use stream::{PeerReply, StreamBindListener};

use crate::common::{Address, Result};
use crate::transport::Listener;
use crate::udp::UdpListener;

/// Result of a bind request
pub enum Binding {
    /// Stream peers (TCP)
    Stream(Box<dyn Listener<Conn = BoundConn>>),
    /// Datagram peers, one pseudo-connection each (UDP)
    Packet(UdpListener),
}

impl Binding {
    /// Address the remote side (or the local socket) listens on
    pub fn local_addr(&self) -> Result<Address> {
        match self {
            Binding::Stream(listener) => listener.local_addr(),
            Binding::Packet(listener) => listener.local_addr(),
        }
    }

    pub async fn close(&self) -> Result<()> {
        match self {
            Binding::Stream(listener) => listener.close().await,
            Binding::Packet(listener) => listener.close().await,
        }
    }

    pub fn into_stream(self) -> Option<Box<dyn Listener<Conn = BoundConn>>> {
        match self {
            Binding::Stream(listener) => Some(listener),
            Binding::Packet(_) => None,
        }
    }

    pub fn into_packet(self) -> Option<UdpListener> {
        match self {
            Binding::Packet(listener) => Some(listener),
            Binding::Stream(_) => None,
        }
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Binding::Stream(_) => f.write_str("Binding::Stream"),
            Binding::Packet(_) => f.write_str("Binding::Packet"),
        }
    }
}
