//! Error types for hopchain

use thiserror::Error;

/// Main error type for hopchain
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown {kind}: {name}")]
    NotRegistered { kind: &'static str, name: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout")]
    Timeout,

    /// The remote proxy answered, but refused the request.
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Listener closed")]
    ListenerClosed,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    #[error("Queue is full")]
    QueueFull,
}

impl Error {
    /// Whether rebuilding the route and trying again may succeed.
    ///
    /// Configuration errors and explicit rejections by a proxy are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Transport(_) | Error::Timeout)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

/// Result type alias for hopchain
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::Transport("reset".into()).is_retryable());
        assert!(Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset)).is_retryable());

        assert!(!Error::Rejected("host unreachable".into()).is_retryable());
        assert!(!Error::Config("bad".into()).is_retryable());
        assert!(!Error::NotRegistered { kind: "protocol", name: "nope".into() }.is_retryable());
        assert!(!Error::ListenerClosed.is_retryable());
    }
}
