//! Proxy node descriptor

use crate::common::{Address, Params};

/// One configured proxy node.
///
/// `protocol` names the connector and `transport` the dialer; both are looked
/// up in the [`Registry`](super::Registry) when the node's client is built.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub addr: Address,
    pub protocol: String,
    pub transport: String,
    pub params: Params,
}

impl Node {
    /// A plain forwarding node over TCP
    pub fn new(name: impl Into<String>, addr: Address) -> Self {
        Self {
            name: name.into(),
            addr,
            protocol: "forward".to_string(),
            transport: "tcp".to_string(),
            params: Params::new(),
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = transport.into();
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}+{}://{})", self.name, self.protocol, self.transport, self.addr)
    }
}
