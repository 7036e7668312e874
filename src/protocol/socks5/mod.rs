//! SOCKS5 connector
//!
//! Besides CONNECT and BIND, UDP is carried over the TCP tunnel itself with
//! the UDP-tunnel command (`0xF3`) and the framing in [`udp`].

mod udp;

pub use udp::{encode_frame, parse_frame, UdpTunnel, UdpTunnelStream};

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::bind::{Binding, PeerReply, StreamBindListener};
use crate::common::{Address, Network, Params, Result, Stream};
use crate::error::Error;
use crate::udp::{ListenerConfig, UdpListener};

use super::Connector;

const SOCKS5_VERSION: u8 = 0x05;
const AUTH_NONE: u8 = 0x00;
const AUTH_PASSWORD: u8 = 0x02;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;
const AUTH_PASSWORD_VERSION: u8 = 0x01;

const CMD_CONNECT: u8 = 0x01;
const CMD_BIND: u8 = 0x02;
/// UDP over the TCP tunnel
const CMD_UDP_TUN: u8 = 0xF3;

const REP_SUCCESS: u8 = 0x00;
const REP_GENERAL_FAILURE: u8 = 0x01;
const REP_NOT_ALLOWED: u8 = 0x02;
const REP_NETWORK_UNREACHABLE: u8 = 0x03;
const REP_HOST_UNREACHABLE: u8 = 0x04;
const REP_CONNECTION_REFUSED: u8 = 0x05;
const REP_TTL_EXPIRED: u8 = 0x06;
const REP_CMD_NOT_SUPPORTED: u8 = 0x07;
const REP_ATYP_NOT_SUPPORTED: u8 = 0x08;

/// SOCKS5 configuration
#[derive(Debug, Clone, Default)]
pub struct Socks5Config {
    /// Username for authentication (optional)
    pub username: Option<String>,
    /// Password for authentication (optional)
    pub password: Option<String>,
}

impl Socks5Config {
    /// Params: `username`, `password`
    pub fn from_params(params: &Params) -> Result<Self> {
        let config = Self {
            username: params.get_str("username").map(str::to_string),
            password: params.get_str("password").map(str::to_string),
        };
        let too_long = |s: &Option<String>| s.as_ref().map_or(false, |s| s.len() > u8::MAX as usize);
        if too_long(&config.username) || too_long(&config.password) {
            return Err(Error::Config("socks5 credentials longer than 255 bytes".into()));
        }
        Ok(config)
    }
}

/// SOCKS5 connector
pub struct Socks5Connector {
    config: Socks5Config,
}

impl Socks5Connector {
    pub fn new(config: Socks5Config) -> Self {
        Self { config }
    }

    fn requires_auth(&self) -> bool {
        self.config.username.is_some()
    }

    async fn authenticate(&self, stream: &mut Stream) -> Result<()> {
        let username = self.config.username.as_deref().unwrap_or("");
        let password = self.config.password.as_deref().unwrap_or("");

        let mut auth_request = BytesMut::with_capacity(3 + username.len() + password.len());
        auth_request.put_u8(AUTH_PASSWORD_VERSION);
        auth_request.put_u8(username.len() as u8);
        auth_request.put_slice(username.as_bytes());
        auth_request.put_u8(password.len() as u8);
        auth_request.put_slice(password.as_bytes());
        stream.write_all(&auth_request).await?;

        let mut auth_response = [0u8; 2];
        stream.read_exact(&mut auth_response).await?;
        if auth_response[1] != 0x00 {
            return Err(Error::Rejected("Authentication failed".into()));
        }
        Ok(())
    }
}

/// Send a request and wait for its (first) reply, returning the address the
/// reply carries.
async fn request(stream: &mut Stream, cmd: u8, addr: &Address) -> Result<Address> {
    let mut req = BytesMut::with_capacity(3 + addr.encoded_len());
    req.put_slice(&[SOCKS5_VERSION, cmd, 0x00]);
    addr.write_to(&mut req)?;
    stream.write_all(&req).await?;
    stream.flush().await?;

    read_reply(stream).await
}

async fn read_reply(stream: &mut Stream) -> Result<Address> {
    let mut header = [0u8; 3];
    stream.read_exact(&mut header).await?;

    if header[0] != SOCKS5_VERSION {
        return Err(Error::Protocol(format!(
            "Invalid SOCKS version in response: {}",
            header[0]
        )));
    }
    if header[1] != REP_SUCCESS {
        return Err(Error::Rejected(format!("SOCKS5 error: {}", reply_message(header[1]))));
    }

    Address::read_from(stream).await
}

fn reply_message(code: u8) -> &'static str {
    match code {
        REP_GENERAL_FAILURE => "General failure",
        REP_NOT_ALLOWED => "Connection not allowed",
        REP_NETWORK_UNREACHABLE => "Network unreachable",
        REP_HOST_UNREACHABLE => "Host unreachable",
        REP_CONNECTION_REFUSED => "Connection refused",
        REP_TTL_EXPIRED => "TTL expired",
        REP_CMD_NOT_SUPPORTED => "Command not supported",
        REP_ATYP_NOT_SUPPORTED => "Address type not supported",
        _ => "Unknown error",
    }
}

/// Decodes the second BIND reply, sent once a peer reaches the bound port.
struct BindPeerReply;

#[async_trait]
impl PeerReply for BindPeerReply {
    async fn read_peer(&self, stream: &mut Stream) -> Result<Address> {
        read_reply(stream).await
    }
}

#[async_trait]
impl Connector for Socks5Connector {
    async fn handshake(&self, mut stream: Stream) -> Result<Stream> {
        // 1. Send greeting
        if self.requires_auth() {
            stream.write_all(&[SOCKS5_VERSION, 2, AUTH_NONE, AUTH_PASSWORD]).await?;
        } else {
            stream.write_all(&[SOCKS5_VERSION, 1, AUTH_NONE]).await?;
        }

        // 2. Read server's selected method
        let mut response = [0u8; 2];
        stream.read_exact(&mut response).await?;

        if response[0] != SOCKS5_VERSION {
            return Err(Error::Protocol(format!(
                "Invalid SOCKS version from server: {}",
                response[0]
            )));
        }

        // 3. Handle authentication
        match response[1] {
            AUTH_NONE => {}
            AUTH_PASSWORD if self.requires_auth() => self.authenticate(&mut stream).await?,
            AUTH_NO_ACCEPTABLE => {
                return Err(Error::Rejected("Server rejected auth methods".into()));
            }
            method => {
                return Err(Error::Protocol(format!("Unexpected auth method: {}", method)));
            }
        }

        Ok(stream)
    }

    async fn connect(&self, mut stream: Stream, network: Network, addr: &Address) -> Result<Stream> {
        match network {
            Network::Tcp => {
                let bound = request(&mut stream, CMD_CONNECT, addr).await?;
                debug!("socks5: connected to {} (bound {})", addr, bound);
                Ok(stream)
            }
            Network::Udp => {
                let bound = request(&mut stream, CMD_UDP_TUN, &Address::unspecified()).await?;
                debug!("socks5: udp tunnel to {} (bound {})", addr, bound);
                Ok(Box::new(UdpTunnelStream::new(stream, addr.clone())))
            }
        }
    }

    async fn bind(
        &self,
        mut stream: Stream,
        network: Network,
        addr: &Address,
        config: &ListenerConfig,
    ) -> Result<Binding> {
        match network {
            Network::Tcp => {
                let bound = request(&mut stream, CMD_BIND, addr).await?;
                debug!("socks5: bind {} -> {}", addr, bound);
                Ok(Binding::Stream(Box::new(StreamBindListener::new(
                    stream,
                    bound,
                    Arc::new(BindPeerReply),
                ))))
            }
            Network::Udp => {
                let bound = request(&mut stream, CMD_UDP_TUN, addr).await?;
                debug!("socks5: udp bind {} -> {}", addr, bound);
                let tunnel = UdpTunnel::new(stream, bound);
                Ok(Binding::Packet(UdpListener::new(Arc::new(tunnel), config.clone())?))
            }
        }
    }

    fn name(&self) -> &'static str {
        "socks5"
    }
}
