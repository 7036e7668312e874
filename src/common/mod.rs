//! Common types and abstractions
//!
//! This module defines the core types used throughout the crate:
//! - Stream: unified async I/O abstraction
//! - Address: network address representation and its binary codec
//! - Network: tcp / udp
//! - Params: per-node parameter bag
//! - bufpool: size-classed buffer pool for hot I/O paths

mod address;
pub mod bufpool;
mod network;
mod params;
mod stream;

pub use address::{Address, ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6};
pub use bufpool::BufferPool;
pub use network::Network;
pub use params::Params;
pub use stream::{AsyncReadWrite, Stream};

// Re-export error types from crate root
pub use crate::error::{Error, Result};
