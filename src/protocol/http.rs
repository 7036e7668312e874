//! HTTP CONNECT connector

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::common::{Address, Network, Params, Result, Stream};
use crate::error::Error;

use super::Connector;

/// Upper bound on the response header block
const MAX_HEADER_LINES: usize = 100;

/// HTTP CONNECT configuration
#[derive(Debug, Clone, Default)]
pub struct HttpConfig {
    /// Username for authentication (optional)
    pub username: Option<String>,
    /// Password for authentication (optional)
    pub password: Option<String>,
}

impl HttpConfig {
    /// Params: `username`, `password`
    pub fn from_params(params: &Params) -> Result<Self> {
        Ok(Self {
            username: params.get_str("username").map(str::to_string),
            password: params.get_str("password").map(str::to_string),
        })
    }
}

/// HTTP CONNECT connector
pub struct HttpConnector {
    config: HttpConfig,
}

impl HttpConnector {
    pub fn new(config: HttpConfig) -> Self {
        Self { config }
    }

    fn authorization(&self) -> Option<String> {
        let username = self.config.username.as_deref()?;
        let password = self.config.password.as_deref().unwrap_or("");
        Some(BASE64.encode(format!("{}:{}", username, password)))
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, mut stream: Stream, network: Network, addr: &Address) -> Result<Stream> {
        if network != Network::Tcp {
            return Err(Error::Unsupported(format!("{} over http", network)));
        }

        let target = addr.to_string();
        let mut request = format!(
            "CONNECT {} HTTP/1.1\r\nHost: {}\r\nProxy-Connection: keep-alive\r\n",
            target, target
        );
        if let Some(auth) = self.authorization() {
            request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", auth));
        }
        request.push_str("\r\n");

        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;

        // Read response
        let mut reader = BufReader::new(stream);
        let mut status_line = String::new();
        if reader.read_line(&mut status_line).await? == 0 {
            return Err(Error::ConnectionClosed);
        }

        let mut parts = status_line.split_whitespace();
        let version = parts.next().unwrap_or("");
        if !version.starts_with("HTTP/") {
            return Err(Error::Protocol(format!("Invalid HTTP response: {}", status_line.trim())));
        }
        let status_code: u16 = parts
            .next()
            .and_then(|code| code.parse().ok())
            .ok_or_else(|| Error::Protocol("Invalid status code".into()))?;

        // Skip remaining headers
        let mut lines = 0;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                return Err(Error::ConnectionClosed);
            }
            if line.trim().is_empty() {
                break;
            }
            lines += 1;
            if lines > MAX_HEADER_LINES {
                return Err(Error::Protocol("HTTP response header too long".into()));
            }
        }

        if status_code != 200 {
            return Err(Error::Rejected(format!("CONNECT {}: {}", target, status_line.trim())));
        }

        debug!("http: connected to {}", target);

        // Bytes the proxy sent right after the header stay in the reader.
        Ok(Box::new(reader))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, DuplexStream};

    async fn read_request(remote: &mut BufReader<DuplexStream>) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            remote.read_line(&mut line).await.unwrap();
            let line = line.trim_end().to_string();
            if line.is_empty() {
                return lines;
            }
            lines.push(line);
        }
    }

    #[tokio::test]
    async fn test_connect_with_auth_keeps_early_data() {
        let (client, remote) = tokio::io::duplex(1024);
        let connector = HttpConnector::new(HttpConfig {
            username: Some("user".into()),
            password: Some("pass".into()),
        });

        let server = tokio::spawn(async move {
            let mut remote = BufReader::new(remote);
            let lines = read_request(&mut remote).await;
            remote
                .get_mut()
                .write_all(b"HTTP/1.1 200 Connection established\r\nVia: test\r\n\r\nearly")
                .await
                .unwrap();
            lines
        });

        let target: Address = "example.com:443".parse().unwrap();
        let mut stream = connector
            .connect(Box::new(client), Network::Tcp, &target)
            .await
            .unwrap();

        let lines = server.await.unwrap();
        assert_eq!(lines[0], "CONNECT example.com:443 HTTP/1.1");
        assert!(lines.contains(&"Host: example.com:443".to_string()));
        assert!(lines.contains(&format!("Proxy-Authorization: Basic {}", BASE64.encode("user:pass"))));

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"early");
    }

    #[tokio::test]
    async fn test_non_200_is_rejected() {
        let (client, remote) = tokio::io::duplex(1024);
        let connector = HttpConnector::new(HttpConfig::default());

        tokio::spawn(async move {
            let mut remote = BufReader::new(remote);
            let lines = read_request(&mut remote).await;
            assert!(!lines.iter().any(|l| l.starts_with("Proxy-Authorization")));
            remote
                .get_mut()
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
        });

        let target: Address = "10.0.0.1:22".parse().unwrap();
        let result = connector.connect(Box::new(client), Network::Tcp, &target).await;
        assert!(matches!(result, Err(Error::Rejected(_))));
    }

    #[tokio::test]
    async fn test_udp_unsupported() {
        let (client, _remote) = tokio::io::duplex(64);
        let connector = HttpConnector::new(HttpConfig::default());
        let target: Address = "10.0.0.1:53".parse().unwrap();
        let result = connector.connect(Box::new(client), Network::Udp, &target).await;
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_garbage_response_is_protocol_error() {
        let (client, mut remote) = tokio::io::duplex(1024);
        let connector = HttpConnector::new(HttpConfig::default());

        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let _ = remote.read(&mut buf).await;
            remote.write_all(b"SSH-2.0-OpenSSH\r\n\r\n").await.unwrap();
        });

        let target: Address = "10.0.0.1:22".parse().unwrap();
        let result = connector.connect(Box::new(client), Network::Tcp, &target).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
