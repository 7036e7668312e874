//! TLS transport
//!
//! Dials TCP like [`TcpDialer`] and upgrades the stream in `handshake`.
//! Because the upgrade runs on whatever stream it is given, a TLS hop deep in
//! a chain is negotiated end-to-end through the earlier hops.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::common::{Address, Params, Result, Stream};
use crate::error::Error;

use super::{Dialer, TcpDialer};

/// TLS configuration
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Server name for SNI; defaults to the node host
    pub server_name: Option<String>,
    /// Skip certificate verification
    pub allow_insecure: bool,
    /// ALPN protocols
    pub alpn: Vec<String>,
    /// Extra trusted CA certificates (PEM)
    pub ca_file: Option<String>,
}

impl TlsConfig {
    /// Params: `server_name`, `insecure`, `alpn`, `ca_file`
    pub fn from_params(params: &Params) -> Result<Self> {
        Ok(Self {
            server_name: params.get_str("server_name").map(String::from),
            allow_insecure: params.get_bool("insecure")?.unwrap_or(false),
            alpn: params.get_strings("alpn")?,
            ca_file: params.get_str("ca_file").map(String::from),
        })
    }
}

/// TLS dialer
pub struct TlsDialer {
    tcp: TcpDialer,
    server_name: Option<String>,
    connector: TlsConnector,
}

impl TlsDialer {
    pub fn new(config: TlsConfig, tcp: TcpDialer) -> Result<Self> {
        let connector = Self::build_connector(&config)?;
        Ok(Self {
            tcp,
            server_name: config.server_name,
            connector,
        })
    }

    pub fn from_params(params: &Params) -> Result<Self> {
        Self::new(TlsConfig::from_params(params)?, TcpDialer::from_params(params)?)
    }

    fn build_connector(config: &TlsConfig) -> Result<TlsConnector> {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        if let Some(path) = &config.ca_file {
            for cert in Self::load_certs(path)? {
                root_store
                    .add(cert)
                    .map_err(|e| Error::Config(format!("Invalid CA certificate in {}: {}", path, e)))?;
            }
        }

        let mut tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        if !config.alpn.is_empty() {
            tls_config.alpn_protocols = config.alpn.iter().map(|s| s.as_bytes().to_vec()).collect();
        }

        if config.allow_insecure {
            tls_config
                .dangerous()
                .set_certificate_verifier(Arc::new(InsecureVerifier));
        }

        Ok(TlsConnector::from(Arc::new(tls_config)))
    }

    fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
        let file = File::open(path)
            .map_err(|e| Error::Config(format!("Failed to open certificate file {}: {}", path, e)))?;
        let mut reader = BufReader::new(file);
        rustls_pemfile::certs(&mut reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Config(format!("Failed to parse certificates: {}", e)))
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    async fn dial(&self, addr: &Address) -> Result<Stream> {
        self.tcp.dial(addr).await
    }

    async fn handshake(&self, stream: Stream, addr: &Address) -> Result<Stream> {
        let server_name = self.server_name.clone().unwrap_or_else(|| addr.host());
        let domain = ServerName::try_from(server_name.clone())
            .map_err(|_| Error::Config(format!("Invalid server name: {}", server_name)))?;

        debug!("TLS handshake with {} (sni: {})", addr, server_name);
        let tls_stream = self
            .connector
            .connect(domain, stream)
            .await
            .map_err(|e| Error::Transport(format!("TLS handshake with {} failed: {}", addr, e)))?;
        Ok(Box::new(tls_stream))
    }

    fn name(&self) -> &'static str {
        "tls"
    }
}

/// Certificate verifier that accepts anything (`insecure` param)
#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_params() {
        let params = Params::new()
            .with("server_name", "proxy.example")
            .with("insecure", true)
            .with("alpn", "h2, http/1.1");
        let config = TlsConfig::from_params(&params).unwrap();
        assert_eq!(config.server_name.as_deref(), Some("proxy.example"));
        assert!(config.allow_insecure);
        assert_eq!(config.alpn, vec!["h2", "http/1.1"]);
    }

    #[test]
    fn test_missing_ca_file_is_config_error() {
        let params = Params::new().with("ca_file", "/nonexistent/ca.pem");
        assert!(matches!(TlsDialer::from_params(&params), Err(Error::Config(_))));
    }
}
