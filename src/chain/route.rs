//! Multi-hop dial
//!
//! ```text
//! dial(hop0) → handshake(hop0)
//!   → hop0.connect(hop1.addr) → handshake(hop1)
//!   → ...
//!   → hopN.connect(target)
//! ```
//!
//! Only the first hop is dialed directly; every later hop is reached through
//! the tunnel built so far.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::bind::Binding;
use crate::common::{Address, Network, Result, Stream};
use crate::error::Error;
use crate::transport::{LocalTcpListener, PacketConn, TcpDialer, UdpSocketConn, UdpStream};
use crate::udp::{ListenerConfig, UdpListener};

use super::{Client, Node};

/// One selected node of a route
#[derive(Debug, Clone)]
pub struct Hop {
    pub node: Arc<Node>,
    pub client: Client,
}

impl Hop {
    pub fn new(node: Arc<Node>, client: Client) -> Self {
        Self { node, client }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Bound on each dial / handshake / connect step
    pub handshake_timeout: Option<Duration>,
}

/// A dialed connection
pub enum Conn {
    Stream(Stream),
    /// Unconnected datagram socket (UDP association mode)
    Packet(Arc<dyn PacketConn>),
}

impl Conn {
    pub fn into_stream(self) -> Option<Stream> {
        match self {
            Conn::Stream(stream) => Some(stream),
            Conn::Packet(_) => None,
        }
    }

    pub fn into_packet(self) -> Option<Arc<dyn PacketConn>> {
        match self {
            Conn::Packet(conn) => Some(conn),
            Conn::Stream(_) => None,
        }
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conn::Stream(_) => f.write_str("Conn::Stream"),
            Conn::Packet(_) => f.write_str("Conn::Packet"),
        }
    }
}

/// Fixed sequence of hops for one connection attempt
#[derive(Debug, Clone, Default)]
pub struct Route {
    hops: Vec<Hop>,
    options: RouteOptions,
}

impl Route {
    pub fn new(hops: Vec<Hop>, options: RouteOptions) -> Self {
        Self { hops, options }
    }

    /// The zero-hop route: connect straight to the target
    pub fn direct() -> Self {
        Self::default()
    }

    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    async fn step<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.options.handshake_timeout {
            Some(timeout) => tokio::time::timeout(timeout, fut).await?,
            None => fut.await,
        }
    }

    /// Build the tunnel to the last hop, ready for its CONNECT or BIND.
    pub async fn connect(&self) -> Result<Stream> {
        let (first, rest) = self
            .hops
            .split_first()
            .ok_or_else(|| Error::Config("cannot connect an empty route".into()))?;

        debug!("route: dial {}", first.node);
        let stream = self.step(first.client.dial(&first.node.addr)).await?;
        let mut stream = self.step(first.client.handshake(stream, &first.node.addr)).await?;

        let mut prev = first;
        for hop in rest {
            debug!("route: {} -> {}", prev.node.name, hop.node);
            stream = self
                .step(prev.client.connect(stream, Network::Tcp, &hop.node.addr))
                .await?;
            stream = self.step(hop.client.handshake(stream, &hop.node.addr)).await?;
            prev = hop;
        }

        Ok(stream)
    }

    /// Connect to `address` through every hop.
    ///
    /// Without hops this is a direct dial; `udp` with an empty address then
    /// yields an unconnected socket.
    pub async fn dial(&self, network: Network, address: &str) -> Result<Conn> {
        let Some(last) = self.hops.last() else {
            return dial_direct(network, address).await;
        };

        let target = Address::parse(address)?;
        let tunnel = self.connect().await?;
        debug!("route: {} {} via {}", network, target, last.node.name);
        let stream = self.step(last.client.connect(tunnel, network, &target)).await?;
        Ok(Conn::Stream(stream))
    }

    /// Ask the last hop (or the local host, without hops) to listen on
    /// `address`.
    pub async fn bind(&self, network: Network, address: &str, config: &ListenerConfig) -> Result<Binding> {
        let addr = if address.is_empty() {
            Address::unspecified()
        } else {
            Address::parse(address)?
        };

        let Some(last) = self.hops.last() else {
            return bind_local(network, &addr, config).await;
        };

        let tunnel = self.connect().await?;
        debug!("route: bind {} {} via {}", network, addr, last.node.name);
        self.step(last.client.bind(tunnel, network, &addr, config)).await
    }
}

async fn dial_direct(network: Network, address: &str) -> Result<Conn> {
    match network {
        Network::Tcp => {
            if address.is_empty() {
                return Err(Error::InvalidAddress("tcp dial needs an address".into()));
            }
            let stream = TcpDialer::new().connect(&Address::parse(address)?).await?;
            Ok(Conn::Stream(Box::new(stream)))
        }
        Network::Udp if address.is_empty() => {
            let conn = UdpSocketConn::bind(&Address::unspecified()).await?;
            Ok(Conn::Packet(Arc::new(conn)))
        }
        Network::Udp => {
            let stream = UdpStream::connect(&Address::parse(address)?).await?;
            Ok(Conn::Stream(Box::new(stream)))
        }
    }
}

async fn bind_local(network: Network, addr: &Address, config: &ListenerConfig) -> Result<Binding> {
    match network {
        Network::Tcp => Ok(Binding::Stream(Box::new(LocalTcpListener::bind(addr).await?))),
        Network::Udp => {
            let conn = UdpSocketConn::bind(addr).await?;
            Ok(Binding::Packet(UdpListener::new(Arc::new(conn), config.clone())?))
        }
    }
}
