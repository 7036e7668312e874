//! Hopchain - multi-hop proxy chain engine
//!
//! # Architecture
//!
//! ```text
//! Service (tcp/udp/rtcp/rudp)
//! → Router (retry, per-attempt timeout)
//! → Chain → Route (one node picked per group)
//! → hop 0: Dialer.dial → Dialer.handshake → Connector.handshake
//! → hop n: Connector.connect(prev) → Dialer.handshake → Connector.handshake
//! → last hop: Connector.connect / Connector.bind to the target
//! ```
//!
//! ## Core Principles
//!
//! - A node is a (transport dialer, protocol connector) pair
//! - Both halves are built by name through a registry
//! - UDP flows through streams and demultiplexed pseudo-connections
//! - A failed step drops and closes everything opened before it
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common/          # Core types: Stream, Address, Network, Params, buffer pool
//! ├── transport/       # Dialers: TCP, UDP, TLS; local listeners
//! ├── protocol/        # Connectors: forward, SOCKS5 (with UDP tunnel), HTTP CONNECT
//! ├── chain/           # Nodes, groups, routes, registry
//! ├── router/          # Retry and timeout policy
//! ├── udp/             # UDP listener demultiplexer
//! ├── bind/            # Reverse accept over a bound tunnel
//! └── app/             # Services, relay, runtime
//! ```

// Core types
pub mod common;
pub mod error;

// Layered architecture
pub mod transport;
pub mod protocol;
pub mod chain;
pub mod router;
pub mod udp;
pub mod bind;
pub mod app;

// Supporting modules
pub mod config;

// Re-exports for convenience
pub use common::{Address, Network, Stream};
pub use error::{Error, Result};
pub use config::Config;

pub use app::Runtime;
pub use chain::{Chain, Registry, Route};
pub use router::Router;
