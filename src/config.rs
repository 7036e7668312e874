//! Configuration module for hopchain
//!
//! Plain JSON mapping: nodes are named once and referenced by name from
//! chains, chains are referenced by name from services.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::common::Params;
use crate::error::{Error, Result};
use crate::router::RouterOptions;
use crate::udp::{self, ListenerConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Log configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Proxy nodes
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    /// Chains of node groups
    #[serde(default)]
    pub chains: Vec<ChainConfig>,

    /// Forwarding services
    #[serde(default)]
    pub services: Vec<ServiceConfig>,

    /// Retry and timeout policy
    #[serde(default)]
    pub router: RouterConfig,

    /// UDP demultiplexer settings
    #[serde(default)]
    pub udp: UdpConfig,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check names and cross references
    pub fn validate(&self) -> Result<()> {
        let mut nodes = HashSet::new();
        for node in &self.nodes {
            if !nodes.insert(node.name.as_str()) {
                return Err(Error::Config(format!("duplicate node: {}", node.name)));
            }
        }

        // A chain may only splice in chains listed before it, which rules
        // out cycles.
        let mut chains = HashSet::new();
        for chain in &self.chains {
            if chains.contains(chain.name.as_str()) {
                return Err(Error::Config(format!("duplicate chain: {}", chain.name)));
            }
            for (i, hop) in chain.hops.iter().enumerate() {
                if let Some(inner) = &hop.chain {
                    if !hop.nodes.is_empty() {
                        return Err(Error::Config(format!(
                            "chain {}: hop {} has both nodes and a chain",
                            chain.name, i
                        )));
                    }
                    if !chains.contains(inner.as_str()) {
                        return Err(Error::Config(format!(
                            "chain {}: hop {} references undefined chain {}",
                            chain.name, i, inner
                        )));
                    }
                    continue;
                }
                if hop.nodes.is_empty() {
                    return Err(Error::Config(format!("chain {}: hop {} has no nodes", chain.name, i)));
                }
                if let Some(missing) = hop.nodes.iter().find(|n| !nodes.contains(n.as_str())) {
                    return Err(Error::Config(format!(
                        "chain {}: unknown node {}",
                        chain.name, missing
                    )));
                }
            }
            chains.insert(chain.name.as_str());
        }

        for service in &self.services {
            if let Some(chain) = &service.chain {
                if !chains.contains(chain.as_str()) {
                    return Err(Error::Config(format!(
                        "service {}: unknown chain {}",
                        service.name, chain
                    )));
                }
            }
        }

        Ok(())
    }

    /// A two-hop example: local port 8053/udp and 2222/tcp forwarded through
    /// a SOCKS5 node and an HTTP node.
    pub fn example() -> Self {
        Config {
            log: LogConfig::default(),
            nodes: vec![
                NodeConfig {
                    name: "socks-a".to_string(),
                    addr: "192.0.2.10:1080".to_string(),
                    protocol: "socks5".to_string(),
                    transport: "tcp".to_string(),
                    params: Params::new()
                        .with("username", "user")
                        .with("password", "pass")
                        .with("timeout", "5s"),
                },
                NodeConfig {
                    name: "socks-b".to_string(),
                    addr: "192.0.2.11:1080".to_string(),
                    protocol: "socks5".to_string(),
                    transport: "tls".to_string(),
                    params: Params::new().with("server_name", "proxy.example.com"),
                },
            ],
            chains: vec![ChainConfig {
                name: "main".to_string(),
                hops: vec![
                    HopConfig {
                        nodes: vec!["socks-a".to_string()],
                        chain: None,
                        strategy: "round_robin".to_string(),
                    },
                    HopConfig {
                        nodes: vec!["socks-b".to_string()],
                        chain: None,
                        strategy: "fifo".to_string(),
                    },
                ],
            }],
            services: vec![
                ServiceConfig {
                    name: "dns".to_string(),
                    network: "udp".to_string(),
                    listen: "127.0.0.1:8053".to_string(),
                    target: "1.1.1.1:53".to_string(),
                    chain: Some("main".to_string()),
                },
                ServiceConfig {
                    name: "ssh".to_string(),
                    network: "tcp".to_string(),
                    listen: "127.0.0.1:2222".to_string(),
                    target: "10.0.0.5:22".to_string(),
                    chain: Some("main".to_string()),
                },
            ],
            router: RouterConfig::default(),
            udp: UdpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// One proxy node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,

    /// `host:port` of the node
    pub addr: String,

    /// Connector name (forward, socks5, http)
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Dialer name (tcp, udp, tls)
    #[serde(default = "default_transport")]
    pub transport: String,

    /// Adapter parameters
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,
}

fn default_protocol() -> String {
    "forward".to_string()
}

fn default_transport() -> String {
    "tcp".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    #[serde(default)]
    pub hops: Vec<HopConfig>,
}

/// Candidates for one hop, or a previously defined chain spliced in place
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopConfig {
    /// Node names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<String>,

    /// Name of a chain defined earlier in the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,

    /// round_robin, random or fifo
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

fn default_strategy() -> String {
    "round_robin".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,

    /// tcp, udp, rtcp or rudp
    pub network: String,

    /// Local address for tcp/udp; address bound on the last hop for
    /// rtcp/rudp
    pub listen: String,

    /// Where accepted peers are forwarded
    pub target: String,

    /// Chain name; none means direct
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub retries: usize,

    /// Deadline of one dial attempt, 0 disables
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Deadline of each hop step, 0 disables
    #[serde(default)]
    pub handshake_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    crate::router::DEFAULT_DIAL_TIMEOUT.as_secs()
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            retries: 0,
            timeout_secs: default_timeout_secs(),
            handshake_timeout_secs: 0,
        }
    }
}

impl RouterConfig {
    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            retries: self.retries,
            timeout: secs(self.timeout_secs),
        }
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        secs(self.handshake_timeout_secs)
    }
}

fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpConfig {
    #[serde(default = "default_backlog")]
    pub backlog: usize,

    #[serde(default = "default_read_queue_size")]
    pub read_queue_size: usize,

    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_keep_alive")]
    pub keep_alive: bool,
}

fn default_backlog() -> usize {
    udp::DEFAULT_BACKLOG
}

fn default_read_queue_size() -> usize {
    udp::DEFAULT_READ_QUEUE_SIZE
}

fn default_read_buffer_size() -> usize {
    udp::DEFAULT_READ_BUFFER_SIZE
}

fn default_ttl_secs() -> u64 {
    udp::DEFAULT_TTL.as_secs()
}

fn default_keep_alive() -> bool {
    true
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            backlog: default_backlog(),
            read_queue_size: default_read_queue_size(),
            read_buffer_size: default_read_buffer_size(),
            ttl_secs: default_ttl_secs(),
            keep_alive: default_keep_alive(),
        }
    }
}

impl UdpConfig {
    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            backlog: self.backlog,
            read_queue_size: self.read_queue_size,
            read_buffer_size: self.read_buffer_size,
            ttl: Duration::from_secs(self.ttl_secs.max(1)),
            keep_alive: self.keep_alive,
        }
    }
}
