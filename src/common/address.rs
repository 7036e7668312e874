//! Address type for network connections
//!
//! Besides the plain `host:port` representation this module carries the
//! SOCKS-style binary address encoding (`ATYP | ADDR | PORT`) shared by the
//! SOCKS5 connector and the UDP tunnel framing.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// Network address representation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// IP socket address (IP + port)
    Socket(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

impl Address {
    /// Create an unspecified address (0.0.0.0:0)
    pub fn unspecified() -> Self {
        Address::Socket(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
    }

    /// Create from domain and port
    pub fn domain(domain: impl Into<String>, port: u16) -> Self {
        Address::Domain(domain.into(), port)
    }

    /// Parse `ip:port`, `[v6]:port` or `host:port`.
    pub fn parse(s: &str) -> Result<Self> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Address::Socket(addr));
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidAddress(format!("missing port in {:?}", s)))?;
        let port: u16 = port
            .parse()
            .map_err(|_| Error::InvalidAddress(format!("invalid port in {:?}", s)))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(Error::InvalidAddress(format!("missing host in {:?}", s)));
        }

        match host.parse::<IpAddr>() {
            Ok(ip) => Ok(Address::Socket(SocketAddr::new(ip, port))),
            Err(_) => Ok(Address::Domain(host.to_string(), port)),
        }
    }

    /// Get the port
    pub fn port(&self) -> u16 {
        match self {
            Address::Socket(addr) => addr.port(),
            Address::Domain(_, port) => *port,
        }
    }

    /// Get the host part as string
    pub fn host(&self) -> String {
        match self {
            Address::Socket(addr) => addr.ip().to_string(),
            Address::Domain(domain, _) => domain.clone(),
        }
    }

    /// Try to get as socket address (fails for domain)
    pub fn as_socket(&self) -> Option<SocketAddr> {
        match self {
            Address::Socket(addr) => Some(*addr),
            Address::Domain(_, _) => None,
        }
    }

    /// Resolve to a socket address, using the system resolver for domains.
    pub async fn resolve(&self) -> Result<SocketAddr> {
        match self {
            Address::Socket(addr) => Ok(*addr),
            Address::Domain(domain, port) => tokio::net::lookup_host((domain.as_str(), *port))
                .await?
                .next()
                .ok_or_else(|| Error::InvalidAddress(format!("no address for {}", domain))),
        }
    }

    /// Length of the binary encoding produced by [`Address::write_to`].
    pub fn encoded_len(&self) -> usize {
        match self {
            Address::Socket(SocketAddr::V4(_)) => 1 + 4 + 2,
            Address::Socket(SocketAddr::V6(_)) => 1 + 16 + 2,
            Address::Domain(domain, _) => 1 + 1 + domain.len() + 2,
        }
    }

    /// Append the binary encoding `ATYP | ADDR | PORT`.
    pub fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        match self {
            Address::Socket(SocketAddr::V4(v4)) => {
                buf.put_u8(ATYP_IPV4);
                buf.put_slice(&v4.ip().octets());
                buf.put_u16(v4.port());
            }
            Address::Socket(SocketAddr::V6(v6)) => {
                buf.put_u8(ATYP_IPV6);
                buf.put_slice(&v6.ip().octets());
                buf.put_u16(v6.port());
            }
            Address::Domain(domain, port) => {
                if domain.len() > u8::MAX as usize {
                    return Err(Error::InvalidAddress(format!("domain too long: {}", domain)));
                }
                buf.put_u8(ATYP_DOMAIN);
                buf.put_u8(domain.len() as u8);
                buf.put_slice(domain.as_bytes());
                buf.put_u16(*port);
            }
        }
        Ok(())
    }

    /// Read one binary-encoded address from a stream.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let atyp = reader.read_u8().await?;
        match atyp {
            ATYP_IPV4 => {
                let mut ip = [0u8; 4];
                reader.read_exact(&mut ip).await?;
                let port = reader.read_u16().await?;
                Ok(Address::Socket(SocketAddr::new(Ipv4Addr::from(ip).into(), port)))
            }
            ATYP_IPV6 => {
                let mut ip = [0u8; 16];
                reader.read_exact(&mut ip).await?;
                let port = reader.read_u16().await?;
                Ok(Address::Socket(SocketAddr::new(Ipv6Addr::from(ip).into(), port)))
            }
            ATYP_DOMAIN => {
                let len = reader.read_u8().await? as usize;
                let mut domain = vec![0u8; len];
                reader.read_exact(&mut domain).await?;
                let port = reader.read_u16().await?;
                let domain = String::from_utf8(domain)
                    .map_err(|_| Error::Protocol("domain is not valid UTF-8".into()))?;
                Ok(Address::Domain(domain, port))
            }
            _ => Err(Error::Protocol(format!("Unsupported address type: {}", atyp))),
        }
    }

    /// Decode an address from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed, otherwise the address
    /// and the number of bytes it occupied.
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some(&atyp) = buf.first() else {
            return Ok(None);
        };

        let (len, addr) = match atyp {
            ATYP_IPV4 => {
                if buf.len() < 7 {
                    return Ok(None);
                }
                let ip = Ipv4Addr::new(buf[1], buf[2], buf[3], buf[4]);
                let port = u16::from_be_bytes([buf[5], buf[6]]);
                (7, Address::Socket(SocketAddr::new(ip.into(), port)))
            }
            ATYP_IPV6 => {
                if buf.len() < 19 {
                    return Ok(None);
                }
                let mut ip = [0u8; 16];
                ip.copy_from_slice(&buf[1..17]);
                let port = u16::from_be_bytes([buf[17], buf[18]]);
                (19, Address::Socket(SocketAddr::new(Ipv6Addr::from(ip).into(), port)))
            }
            ATYP_DOMAIN => {
                let Some(&dlen) = buf.get(1) else {
                    return Ok(None);
                };
                let dlen = dlen as usize;
                let total = 2 + dlen + 2;
                if buf.len() < total {
                    return Ok(None);
                }
                let domain = std::str::from_utf8(&buf[2..2 + dlen])
                    .map_err(|_| Error::Protocol("domain is not valid UTF-8".into()))?;
                let port = u16::from_be_bytes([buf[2 + dlen], buf[3 + dlen]]);
                (total, Address::Domain(domain.to_string(), port))
            }
            _ => return Err(Error::Protocol(format!("Unsupported address type: {}", atyp))),
        };

        Ok(Some((addr, len)))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Socket(addr) => write!(f, "{}", addr),
            Address::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Address::parse(s)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Socket(addr)
    }
}

impl From<(&str, u16)> for Address {
    fn from((domain, port): (&str, u16)) -> Self {
        Address::Domain(domain.to_string(), port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(
            Address::parse("127.0.0.1:1080").unwrap(),
            Address::Socket("127.0.0.1:1080".parse().unwrap())
        );
        assert_eq!(
            Address::parse("[::1]:53").unwrap(),
            Address::Socket("[::1]:53".parse().unwrap())
        );
        assert_eq!(
            Address::parse("example.com:443").unwrap(),
            Address::domain("example.com", 443)
        );
        assert!(Address::parse("example.com").is_err());
        assert!(Address::parse(":80").is_err());
        assert!(Address::parse("host:http").is_err());
    }

    #[test]
    fn test_display_is_stable_key() {
        let v6: Address = "[2001:db8::1]:8080".parse().unwrap();
        assert_eq!(v6.to_string(), "[2001:db8::1]:8080");
        assert_eq!(Address::domain("a.example", 53).to_string(), "a.example:53");
    }

    #[test]
    fn test_decode_partial_and_full() {
        let addr = Address::domain("example.com", 443);
        let mut buf = Vec::new();
        addr.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), addr.encoded_len());

        assert!(Address::decode(&buf[..3]).unwrap().is_none());
        let (decoded, used) = Address::decode(&buf).unwrap().unwrap();
        assert_eq!(decoded, addr);
        assert_eq!(used, buf.len());

        assert!(Address::decode(&[0x09, 0, 0]).is_err());
    }

    #[tokio::test]
    async fn test_read_from_stream() {
        let addr: Address = "10.1.2.3:5353".parse().unwrap();
        let mut buf = Vec::new();
        addr.write_to(&mut buf).unwrap();

        let mut reader = &buf[..];
        assert_eq!(Address::read_from(&mut reader).await.unwrap(), addr);
    }
}
