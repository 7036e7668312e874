//! TCP transport

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::bind::BoundConn;
use crate::common::{Address, Params, Result};
use crate::error::Error;

use super::{Dialer, Listener};

/// Default connect timeout
const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP dialer - raw TCP connections
#[derive(Debug, Clone)]
pub struct TcpDialer {
    timeout: Option<Duration>,
    nodelay: bool,
}

impl TcpDialer {
    pub fn new() -> Self {
        Self {
            timeout: Some(DEFAULT_DIAL_TIMEOUT),
            nodelay: true,
        }
    }

    /// Params: `timeout` (0 disables), `nodelay`
    pub fn from_params(params: &Params) -> Result<Self> {
        let mut dialer = Self::new();
        if let Some(timeout) = params.get_duration("timeout")? {
            dialer.timeout = (!timeout.is_zero()).then_some(timeout);
        }
        if let Some(nodelay) = params.get_bool("nodelay")? {
            dialer.nodelay = nodelay;
        }
        Ok(dialer)
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) async fn connect(&self, addr: &Address) -> Result<TcpStream> {
        let connect = async {
            match addr {
                Address::Socket(socket_addr) => TcpStream::connect(socket_addr).await,
                Address::Domain(domain, port) => TcpStream::connect((domain.as_str(), *port)).await,
            }
        };

        let stream = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect).await??,
            None => connect.await?,
        };

        // Disable Nagle's algorithm for lower latency
        stream.set_nodelay(self.nodelay)?;
        Ok(stream)
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &Address) -> Result<crate::common::Stream> {
        Ok(Box::new(self.connect(addr).await?))
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// Plain local TCP listener, used when a bind request needs no proxy.
pub struct LocalTcpListener {
    listener: TcpListener,
    local: Address,
    closed: CancellationToken,
}

impl LocalTcpListener {
    pub async fn bind(addr: &Address) -> Result<Self> {
        let listener = match addr {
            Address::Socket(socket_addr) => TcpListener::bind(socket_addr).await?,
            Address::Domain(domain, port) => TcpListener::bind((domain.as_str(), *port)).await?,
        };
        let local = Address::Socket(listener.local_addr()?);
        Ok(Self {
            listener,
            local,
            closed: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl Listener for LocalTcpListener {
    type Conn = BoundConn;

    async fn accept(&self) -> Result<BoundConn> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::ListenerClosed),
            accepted = self.listener.accept() => {
                let (stream, peer) = accepted?;
                stream.set_nodelay(true)?;
                Ok(BoundConn::new(Box::new(stream), self.local.clone(), Address::Socket(peer)))
            }
        }
    }

    fn local_addr(&self) -> Result<Address> {
        Ok(self.local.clone())
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_dial_and_local_listener() {
        let listener = LocalTcpListener::bind(&"127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dialer = TcpDialer::new();
        let client = tokio::spawn(async move {
            let mut stream = dialer.dial(&addr).await.unwrap();
            stream.write_all(b"ping").await.unwrap();
        });

        let mut conn = listener.accept().await.unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(conn.local_addr(), &listener.local_addr().unwrap());
        client.await.unwrap();

        listener.close().await.unwrap();
        listener.close().await.unwrap();
        assert!(matches!(listener.accept().await, Err(Error::ListenerClosed)));
    }

    #[test]
    fn test_from_params() {
        let params = Params::new().with("timeout", 0).with("nodelay", false);
        let dialer = TcpDialer::from_params(&params).unwrap();
        assert!(dialer.timeout.is_none());
        assert!(!dialer.nodelay);
    }
}
