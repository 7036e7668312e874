//! Proxy chains
//!
//! A [`Chain`] is an ordered list of [`NodeGroup`]s. Each connection attempt
//! asks the chain for a fresh [`Route`], picking one node per group, and the
//! route then performs the hop-by-hop dial.

mod client;
mod group;
mod node;
mod registry;
mod route;
#[cfg(test)]
pub(crate) mod testing;

pub use client::Client;
pub use group::{NodeGroup, Strategy};
pub use node::Node;
pub use registry::{ConnectorFactory, DialerFactory, Registry};
pub use route::{Conn, Hop, Route, RouteOptions};

use std::sync::Arc;

use crate::common::Result;

/// Named sequence of hop groups
#[derive(Debug, Clone)]
pub struct Chain {
    name: String,
    groups: Vec<Arc<NodeGroup>>,
    options: RouteOptions,
}

impl Chain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
            options: RouteOptions::default(),
        }
    }

    /// Append a hop
    pub fn with_group(mut self, group: NodeGroup) -> Self {
        self.groups.push(Arc::new(group));
        self
    }

    pub fn with_options(mut self, options: RouteOptions) -> Self {
        self.options = options;
        self
    }

    /// Chain of chains: the hops of `chains` back to back.
    ///
    /// Groups are shared with the source chains, including their selection
    /// state.
    pub fn concat(name: impl Into<String>, chains: &[Arc<Chain>]) -> Self {
        let groups = chains
            .iter()
            .flat_map(|chain| chain.groups.iter().cloned())
            .collect();
        let options = chains
            .iter()
            .map(|chain| chain.options.clone())
            .find(|options| options.handshake_timeout.is_some())
            .unwrap_or_default();
        Self {
            name: name.into(),
            groups,
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of hops
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Select one node per hop
    pub fn route(&self) -> Result<Route> {
        let hops = self
            .groups
            .iter()
            .map(|group| group.select())
            .collect::<Result<Vec<_>>>()?;
        Ok(Route::new(hops, self.options.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::{hop, Recorder};
    use crate::error::Error;

    fn group(names: &[&str], recorder: &Arc<Recorder>) -> NodeGroup {
        NodeGroup::new(names.iter().map(|name| hop(name, recorder)).collect(), Strategy::RoundRobin)
    }

    fn names(route: &Route) -> Vec<String> {
        route.hops().iter().map(|hop| hop.node.name.clone()).collect()
    }

    #[test]
    fn test_route_picks_one_node_per_group() {
        let recorder = Recorder::new();
        let chain = Chain::new("c")
            .with_group(group(&["a1", "a2"], &recorder))
            .with_group(group(&["b"], &recorder));

        assert_eq!(chain.len(), 2);
        assert_eq!(names(&chain.route().unwrap()), ["a1", "b"]);
        assert_eq!(names(&chain.route().unwrap()), ["a2", "b"]);
        assert_eq!(names(&chain.route().unwrap()), ["a1", "b"]);
    }

    #[test]
    fn test_empty_group_fails_route() {
        let recorder = Recorder::new();
        let chain = Chain::new("c")
            .with_group(group(&["a"], &recorder))
            .with_group(NodeGroup::new(Vec::new(), Strategy::Fifo));
        assert!(matches!(chain.route(), Err(Error::Config(_))));
    }

    #[test]
    fn test_concat_chains() {
        let recorder = Recorder::new();
        let front = Arc::new(Chain::new("front").with_group(group(&["a"], &recorder)));
        let back = Arc::new(
            Chain::new("back")
                .with_group(group(&["b"], &recorder))
                .with_group(group(&["c"], &recorder)),
        );

        let chain = Chain::concat("all", &[front, back]);
        assert_eq!(chain.name(), "all");
        assert_eq!(names(&chain.route().unwrap()), ["a", "b", "c"]);
        assert!(Chain::new("none").route().unwrap().is_empty());
    }
}
