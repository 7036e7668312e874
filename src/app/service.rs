//! Port-forwarding services
//!
//! - `tcp`:  local TCP listener → router dial → relay
//! - `udp`:  local UDP demultiplexer → router dial per peer → datagram relay
//! - `rtcp`: TCP bind on the last hop → direct dial → relay
//! - `rudp`: UDP bind on the last hop → direct dial per peer → datagram relay

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bind::{Binding, BoundConn};
use crate::chain::Route;
use crate::common::{Address, Network, Result, Stream};
use crate::error::Error;
use crate::router::Router;
use crate::transport::{Listener, LocalTcpListener, UdpSocketConn};
use crate::udp::{ListenerConfig, UdpConn, UdpListener};

use super::relay::{format_bytes, relay_datagrams, relay_stream};

/// Delay before a remote listener is bound again
const REBIND_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Tcp,
    Udp,
    RemoteTcp,
    RemoteUdp,
}

impl FromStr for ServiceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(ServiceKind::Tcp),
            "udp" => Ok(ServiceKind::Udp),
            "rtcp" => Ok(ServiceKind::RemoteTcp),
            "rudp" => Ok(ServiceKind::RemoteUdp),
            _ => Err(Error::Config(format!("unknown service network: {}", s))),
        }
    }
}

impl ServiceKind {
    fn network(&self) -> Network {
        match self {
            ServiceKind::Tcp | ServiceKind::RemoteTcp => Network::Tcp,
            ServiceKind::Udp | ServiceKind::RemoteUdp => Network::Udp,
        }
    }
}

/// One forwarding service
pub struct Service {
    name: String,
    kind: ServiceKind,
    listen: String,
    target: String,
    router: Arc<Router>,
    udp: ListenerConfig,
}

impl Service {
    pub fn new(
        name: impl Into<String>,
        kind: ServiceKind,
        listen: impl Into<String>,
        target: impl Into<String>,
        router: Arc<Router>,
        udp: ListenerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            listen: listen.into(),
            target: target.into(),
            router,
            udp,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        match self.kind {
            ServiceKind::Tcp => {
                let listener = LocalTcpListener::bind(&listen_address(&self.listen)?).await?;
                info!("[{}] tcp {} -> {}", self.name, listener.local_addr()?, self.target);
                self.serve_streams(&listener, &shutdown).await;
                listener.close().await
            }
            ServiceKind::Udp => {
                let socket = UdpSocketConn::bind(&listen_address(&self.listen)?).await?;
                let listener = UdpListener::new(Arc::new(socket), self.udp.clone())?;
                info!("[{}] udp {} -> {}", self.name, listener.local_addr()?, self.target);
                self.serve_datagrams(&listener, &shutdown).await;
                listener.close().await
            }
            ServiceKind::RemoteTcp | ServiceKind::RemoteUdp => self.serve_remote(&shutdown).await,
        }
    }

    /// Keep a remote listener bound on the last hop, binding again whenever
    /// the proxy drops it.
    async fn serve_remote(self: &Arc<Self>, shutdown: &CancellationToken) -> Result<()> {
        let network = self.kind.network();
        while !shutdown.is_cancelled() {
            let bound = tokio::select! {
                _ = shutdown.cancelled() => break,
                bound = self.router.bind(network, &self.listen, &self.udp) => bound,
            };

            match bound {
                Ok(binding) => {
                    info!("[{}] r{} {} -> {}", self.name, network, binding.local_addr()?, self.target);
                    match binding {
                        Binding::Stream(listener) => {
                            self.serve_streams(listener.as_ref(), shutdown).await;
                            listener.close().await?;
                        }
                        Binding::Packet(listener) => {
                            self.serve_datagrams(&listener, shutdown).await;
                            listener.close().await?;
                        }
                    }
                }
                Err(e) if e.is_retryable() || matches!(e, Error::Rejected(_)) => {
                    warn!("[{}] bind {} failed: {}", self.name, self.listen, e);
                }
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(REBIND_DELAY) => {}
            }
        }
        Ok(())
    }

    async fn serve_streams(self: &Arc<Self>, listener: &dyn Listener<Conn = BoundConn>, shutdown: &CancellationToken) {
        let mut count: u64 = 0;
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok(conn) => {
                    count += 1;
                    debug!("[{}] connection #{} from {}", self.name, count, conn.peer_addr());
                    let service = Arc::clone(self);
                    tokio::spawn(async move {
                        let peer = conn.peer_addr().clone();
                        if let Err(e) = service.forward_stream(conn.into_inner()).await {
                            warn!("[{}] {} -> {}: {}", service.name, peer, service.target, e);
                        }
                    });
                }
                Err(Error::ListenerClosed) => break,
                Err(e) => {
                    error!("[{}] accept error: {}", self.name, e);
                    if !e.is_retryable() {
                        break;
                    }
                }
            }
        }
        info!("[{}] stopped accepting (handled {} connections)", self.name, count);
    }

    async fn serve_datagrams(self: &Arc<Self>, listener: &UdpListener, shutdown: &CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok(conn) => {
                    debug!("[{}] new peer {}", self.name, conn.peer_addr());
                    let service = Arc::clone(self);
                    tokio::spawn(async move {
                        let peer = conn.peer_addr().clone();
                        if let Err(e) = service.forward_datagrams(conn).await {
                            warn!("[{}] {} -> {}: {}", service.name, peer, service.target, e);
                        }
                    });
                }
                Err(Error::ListenerClosed) => break,
                Err(e) => {
                    error!("[{}] accept error: {}", self.name, e);
                    break;
                }
            }
        }
    }

    /// Remote services reach their target directly from this host; local
    /// services go through the router.
    async fn dial_target(&self, network: Network) -> Result<Stream> {
        let conn = match self.kind {
            ServiceKind::Tcp | ServiceKind::Udp => self.router.dial(network, &self.target).await?,
            ServiceKind::RemoteTcp | ServiceKind::RemoteUdp => Route::direct().dial(network, &self.target).await?,
        };
        conn.into_stream()
            .ok_or_else(|| Error::Unsupported(format!("{} target without address", network)))
    }

    async fn forward_stream(&self, inbound: Stream) -> Result<()> {
        let outbound = self.dial_target(Network::Tcp).await?;
        let (up, down) = relay_stream(inbound, outbound).await?;
        debug!(
            "[{}] closed -> {} (↑{} ↓{})",
            self.name,
            self.target,
            format_bytes(up),
            format_bytes(down)
        );
        Ok(())
    }

    async fn forward_datagrams(&self, conn: UdpConn) -> Result<()> {
        let remote = match self.dial_target(Network::Udp).await {
            Ok(remote) => remote,
            Err(e) => {
                conn.close();
                return Err(e);
            }
        };
        let (up, down) = relay_datagrams(conn, remote, self.udp.read_buffer_size).await?;
        debug!("[{}] udp session -> {} ended (↑{} ↓{} datagrams)", self.name, self.target, up, down);
        Ok(())
    }
}

/// `:port` listens on every interface
fn listen_address(listen: &str) -> Result<Address> {
    if let Some(port) = listen.strip_prefix(':') {
        return Address::parse(&format!("0.0.0.0:{}", port));
    }
    Address::parse(listen)
}
