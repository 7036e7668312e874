//! Stream abstraction
//!
//! Every dialer, handshake and connector consumes and produces a [`Stream`],
//! so protocols can be layered over one another in any order.

use tokio::io::{AsyncRead, AsyncWrite};

/// The byte-stream type passed between hops.
pub type Stream = Box<dyn AsyncReadWrite + Unpin + Send>;

/// Combined trait for async read + write
pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}

impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}
