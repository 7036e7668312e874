//! Application Layer
//!
//! This module contains:
//! - Service: local and remote port forwarding (tcp/udp/rtcp/rudp)
//! - Relay: bidirectional copy between a client and its route
//! - Runtime: configuration-driven assembly and lifecycle

mod relay;
mod runtime;
mod service;

pub use relay::{format_bytes, relay_datagrams, relay_stream};
pub use runtime::Runtime;
pub use service::{Service, ServiceKind};
