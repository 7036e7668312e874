//! Per-node client: transport dialer plus protocol connector

use std::sync::Arc;

use crate::bind::Binding;
use crate::common::{Address, Network, Result, Stream};
use crate::protocol::Connector;
use crate::transport::Dialer;
use crate::udp::ListenerConfig;

/// How to reach and speak to one node
#[derive(Clone)]
pub struct Client {
    dialer: Arc<dyn Dialer>,
    connector: Arc<dyn Connector>,
}

impl Client {
    pub fn new(dialer: Arc<dyn Dialer>, connector: Arc<dyn Connector>) -> Self {
        Self { dialer, connector }
    }

    /// Open the transport connection to the node itself
    pub async fn dial(&self, addr: &Address) -> Result<Stream> {
        self.dialer.dial(addr).await
    }

    /// Transport handshake followed by protocol handshake
    pub async fn handshake(&self, stream: Stream, addr: &Address) -> Result<Stream> {
        let stream = self.dialer.handshake(stream, addr).await?;
        self.connector.handshake(stream).await
    }

    pub async fn connect(&self, stream: Stream, network: Network, addr: &Address) -> Result<Stream> {
        self.connector.connect(stream, network, addr).await
    }

    pub async fn bind(
        &self,
        stream: Stream,
        network: Network,
        addr: &Address,
        config: &ListenerConfig,
    ) -> Result<Binding> {
        self.connector.bind(stream, network, addr, config).await
    }

    pub fn is_multiplex(&self) -> bool {
        self.dialer.is_multiplex()
    }

    pub fn dialer(&self) -> &Arc<dyn Dialer> {
        &self.dialer
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("dialer", &self.dialer.name())
            .field("connector", &self.connector.name())
            .finish()
    }
}
