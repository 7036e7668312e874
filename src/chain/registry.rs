//! Name → factory tables for dialers and connectors

use std::collections::HashMap;
use std::sync::Arc;

use crate::common::{Params, Result};
use crate::error::Error;
use crate::protocol::{self, Connector};
use crate::transport::{self, Dialer};

use super::{Client, Node};

/// Builds a dialer from node params
pub type DialerFactory = Arc<dyn Fn(&Params) -> Result<Arc<dyn Dialer>> + Send + Sync>;
/// Builds a connector from node params
pub type ConnectorFactory = Arc<dyn Fn(&Params) -> Result<Arc<dyn Connector>> + Send + Sync>;

/// Known transports and protocols.
///
/// Passed around explicitly; adapter modules add themselves through their
/// `register` function.
#[derive(Clone, Default)]
pub struct Registry {
    dialers: HashMap<String, DialerFactory>,
    connectors: HashMap<String, ConnectorFactory>,
}

impl Registry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in transport and protocol
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        transport::register(&mut registry);
        protocol::register(&mut registry);
        registry
    }

    /// Add or replace a transport
    pub fn register_dialer<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Params) -> Result<Arc<dyn Dialer>> + Send + Sync + 'static,
    {
        self.dialers.insert(name.to_string(), Arc::new(factory));
    }

    /// Add or replace a protocol
    pub fn register_connector<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Params) -> Result<Arc<dyn Connector>> + Send + Sync + 'static,
    {
        self.connectors.insert(name.to_string(), Arc::new(factory));
    }

    pub fn has_dialer(&self, name: &str) -> bool {
        self.dialers.contains_key(name)
    }

    pub fn has_connector(&self, name: &str) -> bool {
        self.connectors.contains_key(name)
    }

    pub fn new_dialer(&self, name: &str, params: &Params) -> Result<Arc<dyn Dialer>> {
        let factory = self.dialers.get(name).ok_or_else(|| Error::NotRegistered {
            kind: "transport",
            name: name.to_string(),
        })?;
        factory(params)
    }

    pub fn new_connector(&self, name: &str, params: &Params) -> Result<Arc<dyn Connector>> {
        let factory = self.connectors.get(name).ok_or_else(|| Error::NotRegistered {
            kind: "protocol",
            name: name.to_string(),
        })?;
        factory(params)
    }

    /// Build the client for `node` from its transport and protocol names
    pub fn new_client(&self, node: &Node) -> Result<Client> {
        let dialer = self.new_dialer(&node.transport, &node.params)?;
        let connector = self.new_connector(&node.protocol, &node.params)?;
        Ok(Client::new(dialer, connector))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dialers: Vec<_> = self.dialers.keys().collect();
        let mut connectors: Vec<_> = self.connectors.keys().collect();
        dialers.sort();
        connectors.sort();
        f.debug_struct("Registry")
            .field("dialers", &dialers)
            .field("connectors", &connectors)
            .finish()
    }
}
