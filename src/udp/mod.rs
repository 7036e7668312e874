//! UDP connection demultiplexer
//!
//! Turns one shared [`PacketConn`](crate::transport::PacketConn) into many
//! per-peer pseudo-connections:
//!
//! ```text
//! PacketConn ──recv_from──▶ receive loop ──▶ peer table ──▶ UdpConn queue
//!                                 │
//!                                 └── new peer ──▶ accept queue ──▶ accept()
//! ```
//!
//! Both queues are bounded and filled with `try_send`: when full, the
//! datagram (or new peer) is dropped and the loop moves on. An idle sweep
//! closes pseudo-connections that saw no reads for a full `ttl` interval.

mod conn;
mod listener;
mod pool;
#[cfg(test)]
pub(crate) mod testing;

pub use conn::UdpConn;
pub use listener::UdpListener;

use std::time::Duration;

/// Default maximum of pending, not yet accepted peers
pub const DEFAULT_BACKLOG: usize = 128;
/// Default per-peer receive queue depth
pub const DEFAULT_READ_QUEUE_SIZE: usize = 1000;
/// Default size of the buffer one datagram is read into
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;
/// Default idle sweep interval
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

/// Demultiplexer settings
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Max pending pseudo-connections not yet accepted
    pub backlog: usize,
    /// Per-peer receive queue capacity, in datagrams
    pub read_queue_size: usize,
    /// Receive buffer size per datagram
    pub read_buffer_size: usize,
    /// Idle sweep interval; idle peers are evicted after one to two intervals
    pub ttl: Duration,
    /// When false, a pseudo-connection closes after its first send
    pub keep_alive: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
            read_queue_size: DEFAULT_READ_QUEUE_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            ttl: DEFAULT_TTL,
            keep_alive: true,
        }
    }
}
