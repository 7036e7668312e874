//! Proxy Protocol Layer
//!
//! Responsibilities:
//! - Protocol handshake with a proxy node (method selection, authentication)
//! - Asking the node to CONNECT to the next address
//! - Asking the node to BIND a listener on its side
//!
//! Connectors never open sockets themselves; they speak over whatever stream
//! the transport layer (or an earlier hop) hands them.

mod forward;
mod http;
pub mod socks5;

pub use forward::ForwardConnector;
pub use http::{HttpConfig, HttpConnector};
pub use socks5::{Socks5Config, Socks5Connector};

use std::sync::Arc;

use async_trait::async_trait;

use crate::bind::Binding;
use crate::chain::Registry;
use crate::common::{Address, Network, Params, Result, Stream};
use crate::error::Error;
use crate::udp::ListenerConfig;

/// Client side of a proxy protocol.
///
/// Every method consumes the stream it is given, so a failure closes the
/// underlying tunnel.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Protocol-level negotiation right after the transport is ready
    async fn handshake(&self, stream: Stream) -> Result<Stream> {
        Ok(stream)
    }

    /// Request a connection to `addr` through the node.
    ///
    /// A refusal by the proxy is `Error::Rejected`, a malformed answer is
    /// `Error::Protocol`.
    async fn connect(&self, stream: Stream, network: Network, addr: &Address) -> Result<Stream>;

    /// Request a listener on the node's side
    async fn bind(
        &self,
        _stream: Stream,
        network: Network,
        _addr: &Address,
        _config: &ListenerConfig,
    ) -> Result<Binding> {
        Err(Error::Unsupported(format!("{} bind over {}", network, self.name())))
    }

    /// Get protocol name
    fn name(&self) -> &'static str;
}

fn new_forward(_params: &Params) -> Result<Arc<dyn Connector>> {
    Ok(Arc::new(ForwardConnector))
}

fn new_socks5(params: &Params) -> Result<Arc<dyn Connector>> {
    Ok(Arc::new(Socks5Connector::new(Socks5Config::from_params(params)?)))
}

fn new_http(params: &Params) -> Result<Arc<dyn Connector>> {
    Ok(Arc::new(HttpConnector::new(HttpConfig::from_params(params)?)))
}

/// Register the built-in connectors
pub fn register(registry: &mut Registry) {
    registry.register_connector("forward", new_forward);
    registry.register_connector("socks5", new_socks5);
    registry.register_connector("socks", new_socks5);
    registry.register_connector("http", new_http);
}
