//! Runtime - configuration-driven assembly
//!
//! The runtime is responsible for:
//! - Building a client for every node through the registry
//! - Assembling node groups and chains
//! - Building one router per service
//! - Managing service lifecycle

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::chain::{Chain, Hop, Node, NodeGroup, Registry, RouteOptions, Strategy};
use crate::common::{Address, Result};
use crate::config::Config;
use crate::error::Error;
use crate::router::Router;

use super::service::{Service, ServiceKind};

/// Runtime manages the service lifecycle
pub struct Runtime {
    services: Vec<Arc<Service>>,
    chains: HashMap<String, Arc<Chain>>,
    shutdown: CancellationToken,
}

impl Runtime {
    /// Build runtime from configuration using the built-in transports and
    /// protocols.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::from_config_with_registry(config, &Registry::with_defaults())
    }

    pub fn from_config_with_registry(config: &Config, registry: &Registry) -> Result<Self> {
        config.validate()?;

        // Build nodes
        let mut hops: HashMap<&str, Hop> = HashMap::new();
        for node_config in &config.nodes {
            let addr = Address::parse(&node_config.addr)
                .map_err(|e| Error::Config(format!("node {}: {}", node_config.name, e)))?;
            let node = Node::new(&node_config.name, addr)
                .with_protocol(&node_config.protocol)
                .with_transport(&node_config.transport)
                .with_params(node_config.params.clone());
            let client = registry.new_client(&node)?;
            debug!("Built node {} ({}+{})", node, node.protocol, node.transport);
            hops.insert(node_config.name.as_str(), Hop::new(Arc::new(node), client));
        }

        // Build chains
        let options = RouteOptions {
            handshake_timeout: config.router.handshake_timeout(),
        };
        let mut chains: HashMap<String, Arc<Chain>> = HashMap::new();
        for chain_config in &config.chains {
            // Runs of node hops become anonymous segments; a chain hop splices
            // in the groups of an earlier chain.
            let mut segments = Vec::new();
            let mut chain = Chain::new(&chain_config.name);
            for hop_config in &chain_config.hops {
                if let Some(name) = &hop_config.chain {
                    let inner = chains
                        .get(name)
                        .cloned()
                        .ok_or_else(|| Error::Config(format!("unknown chain: {}", name)))?;
                    if !chain.is_empty() {
                        segments.push(Arc::new(chain));
                    }
                    segments.push(inner);
                    chain = Chain::new(&chain_config.name);
                    continue;
                }

                let strategy: Strategy = hop_config.strategy.parse()?;
                let members = hop_config
                    .nodes
                    .iter()
                    .map(|name| {
                        hops.get(name.as_str())
                            .cloned()
                            .ok_or_else(|| Error::Config(format!("unknown node: {}", name)))
                    })
                    .collect::<Result<Vec<_>>>()?;
                chain = chain.with_group(NodeGroup::new(members, strategy));
            }
            if !segments.is_empty() {
                if !chain.is_empty() {
                    segments.push(Arc::new(chain));
                }
                chain = Chain::concat(&chain_config.name, &segments);
            }
            let chain = chain.with_options(options.clone());
            debug!("Built chain {} with {} hops", chain.name(), chain.len());
            chains.insert(chain_config.name.clone(), Arc::new(chain));
        }

        // Build services
        let router_options = config.router.router_options();
        let udp = config.udp.listener_config();
        let mut services = Vec::new();
        for service_config in &config.services {
            let chain = match &service_config.chain {
                Some(name) => Some(
                    chains
                        .get(name)
                        .cloned()
                        .ok_or_else(|| Error::Config(format!("unknown chain: {}", name)))?,
                ),
                None => None,
            };
            let kind: ServiceKind = service_config.network.parse()?;
            let router = Arc::new(Router::new(chain, router_options.clone()));
            services.push(Arc::new(Service::new(
                &service_config.name,
                kind,
                &service_config.listen,
                &service_config.target,
                router,
                udp.clone(),
            )));
        }

        Ok(Self {
            services,
            chains,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    pub fn chain(&self, name: &str) -> Option<&Arc<Chain>> {
        self.chains.get(name)
    }

    /// Token that stops every service when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run all services until Ctrl+C
    pub async fn run(&self) -> Result<()> {
        let mut handles = Vec::new();

        for service in &self.services {
            let service = Arc::clone(service);
            let shutdown = self.shutdown.child_token();

            let handle = tokio::spawn(async move {
                let name = service.name().to_string();
                if let Err(e) = service.run(shutdown).await {
                    error!("[{}] Service error: {}", name, e);
                }
            });

            handles.push(handle);
        }

        info!("Runtime started with {} services", self.services.len());

        tokio::select! {
            signal = tokio::signal::ctrl_c() => signal?,
            _ = self.shutdown.cancelled() => {}
        }
        info!("Shutting down...");
        self.shutdown.cancel();

        for handle in handles {
            let _ = handle.await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NodeConfig, ServiceConfig};

    #[test]
    fn test_example_config_builds() {
        let runtime = Runtime::from_config(&Config::example()).unwrap();
        assert_eq!(runtime.services().len(), 2);
        assert_eq!(runtime.services()[0].kind(), ServiceKind::Udp);

        let chain = runtime.chain("main").unwrap();
        assert_eq!(chain.len(), 2);
        let route = chain.route().unwrap();
        assert_eq!(route.hops()[0].node.name, "socks-a");
        assert_eq!(route.hops()[1].node.transport, "tls");
    }

    #[test]
    fn test_unknown_protocol_is_reported() {
        let mut config = Config::example();
        config.nodes[0].protocol = "vmess".to_string();

        match Runtime::from_config(&config) {
            Err(Error::NotRegistered { kind, name }) => {
                assert_eq!(kind, "protocol");
                assert_eq!(name, "vmess");
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_chain_spliced_into_chain() {
        let config = Config::from_json(
            r#"{
                "nodes": [
                    { "name": "a", "addr": "127.0.0.1:1001" },
                    { "name": "b", "addr": "127.0.0.1:1002" },
                    { "name": "c", "addr": "127.0.0.1:1003" }
                ],
                "chains": [
                    { "name": "inner", "hops": [{ "nodes": ["b"] }, { "nodes": ["c"] }] },
                    { "name": "outer", "hops": [{ "nodes": ["a"] }, { "chain": "inner" }] }
                ],
                "router": { "handshake_timeout_secs": 3 }
            }"#,
        )
        .unwrap();

        let runtime = Runtime::from_config(&config).unwrap();
        let route = runtime.chain("outer").unwrap().route().unwrap();
        let names: Vec<&str> = route.hops().iter().map(|hop| hop.node.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(runtime.chain("inner").unwrap().len(), 2);
    }

    #[test]
    fn test_bad_service_network() {
        let mut config = Config::example();
        config.services[0].network = "sctp".to_string();
        assert!(matches!(Runtime::from_config(&config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_token() {
        let config = Config {
            nodes: vec![NodeConfig {
                name: "unused".to_string(),
                addr: "127.0.0.1:1".to_string(),
                protocol: "forward".to_string(),
                transport: "tcp".to_string(),
                params: Default::default(),
            }],
            services: vec![ServiceConfig {
                name: "echo".to_string(),
                network: "tcp".to_string(),
                listen: "127.0.0.1:0".to_string(),
                target: "127.0.0.1:9".to_string(),
                chain: None,
            }],
            ..Default::default()
        };

        let runtime = Arc::new(Runtime::from_config(&config).unwrap());
        let token = runtime.shutdown_token();
        let running = tokio::spawn({
            let runtime = Arc::clone(&runtime);
            async move { runtime.run().await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        token.cancel();
        running.await.unwrap().unwrap();
    }
}
