//! UDP over a SOCKS5 TCP tunnel
//!
//! Frame layout, repeated back to back on the stream:
//!
//! ```text
//! +--------+------+----------------+---------+
//! | LEN(2) | FRAG | ATYP ADDR PORT | PAYLOAD |
//! +--------+------+----------------+---------+
//! ```
//!
//! `LEN` is the big-endian payload length and `FRAG` is always 0.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::io::poll_read_buf;
use tokio_util::sync::CancellationToken;

use crate::common::{Address, Result, Stream};
use crate::error::Error;
use crate::transport::PacketConn;

const FRAME_HEADER_LEN: usize = 3;
const READ_RESERVE: usize = 4096;

/// Append one frame carrying `payload` for `addr`.
pub fn encode_frame(buf: &mut BytesMut, addr: &Address, payload: &[u8]) -> Result<()> {
    let len = u16::try_from(payload.len())
        .map_err(|_| Error::Protocol(format!("datagram too large: {} bytes", payload.len())))?;
    buf.reserve(FRAME_HEADER_LEN + addr.encoded_len() + payload.len());
    buf.put_u16(len);
    buf.put_u8(0);
    addr.write_to(buf)?;
    buf.put_slice(payload);
    Ok(())
}

/// Split one complete frame off the front of `buf`, or `None` if it has not
/// fully arrived yet.
pub fn parse_frame(buf: &mut BytesMut) -> Result<Option<(Address, Bytes)>> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if buf[2] != 0 {
        return Err(Error::Protocol(format!("fragmented datagram: {}", buf[2])));
    }

    let Some((addr, addr_len)) = Address::decode(&buf[FRAME_HEADER_LEN..])? else {
        return Ok(None);
    };
    if buf.len() < FRAME_HEADER_LEN + addr_len + len {
        return Ok(None);
    }

    buf.advance(FRAME_HEADER_LEN + addr_len);
    Ok(Some((addr, buf.split_to(len).freeze())))
}

fn invalid_data(e: Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

/// Tunnel as a datagram stream to one fixed target.
///
/// Each write sends one frame addressed to the target; each read yields the
/// payload of one frame, truncated to the caller's buffer.
pub struct UdpTunnelStream {
    inner: Stream,
    target: Address,
    rbuf: BytesMut,
    wbuf: BytesMut,
    pending_len: usize,
}

impl UdpTunnelStream {
    pub fn new(inner: Stream, target: Address) -> Self {
        Self {
            inner,
            target,
            rbuf: BytesMut::new(),
            wbuf: BytesMut::new(),
            pending_len: 0,
        }
    }
}

impl AsyncRead for UdpTunnelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if let Some((_, payload)) = parse_frame(&mut this.rbuf).map_err(invalid_data)? {
                // Reading zero bytes means end of stream; empty datagrams are dropped.
                if payload.is_empty() && buf.remaining() > 0 {
                    continue;
                }
                let n = payload.len().min(buf.remaining());
                buf.put_slice(&payload[..n]);
                return Poll::Ready(Ok(()));
            }

            this.rbuf.reserve(READ_RESERVE);
            let n = ready!(poll_read_buf(Pin::new(&mut this.inner), cx, &mut this.rbuf))?;
            if n == 0 {
                if this.rbuf.is_empty() {
                    return Poll::Ready(Ok(()));
                }
                return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
            }
        }
    }
}

impl AsyncWrite for UdpTunnelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        // A frame that was partly written is finished before a new one starts.
        if this.wbuf.is_empty() {
            encode_frame(&mut this.wbuf, &this.target, buf).map_err(invalid_data)?;
            this.pending_len = buf.len();
        }

        while !this.wbuf.is_empty() {
            let n = ready!(Pin::new(&mut this.inner).poll_write(cx, &this.wbuf))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            this.wbuf.advance(n);
        }
        Poll::Ready(Ok(this.pending_len))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

struct TunnelReader {
    half: ReadHalf<Stream>,
    buf: BytesMut,
}

/// Tunnel as a [`PacketConn`]: every frame names its own peer.
///
/// Writers are serialized so frames never interleave.
pub struct UdpTunnel {
    reader: Mutex<TunnelReader>,
    writer: Mutex<WriteHalf<Stream>>,
    local: Address,
    closed: CancellationToken,
}

impl UdpTunnel {
    /// `local` is the address the proxy bound for this tunnel.
    pub fn new(stream: Stream, local: Address) -> Self {
        let (half, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(TunnelReader {
                half,
                buf: BytesMut::new(),
            }),
            writer: Mutex::new(writer),
            local,
            closed: CancellationToken::new(),
        }
    }

    async fn read_frame(&self) -> Result<(Address, Bytes)> {
        let mut reader = self.reader.lock().await;
        let TunnelReader { half, buf } = &mut *reader;
        loop {
            if let Some(frame) = parse_frame(buf)? {
                return Ok(frame);
            }
            buf.reserve(READ_RESERVE);
            if half.read_buf(buf).await? == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }
}

#[async_trait]
impl PacketConn for UdpTunnel {
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address)> {
        let (addr, payload) = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(Error::ConnectionClosed),
            frame = self.read_frame() => frame?,
        };
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        Ok((n, addr))
    }

    async fn send_to(&self, buf: &[u8], addr: &Address) -> Result<usize> {
        if self.closed.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }
        let mut frame = BytesMut::new();
        encode_frame(&mut frame, addr, buf)?;

        // A writer stalled on a full tunnel gives up once the tunnel closes.
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::ConnectionClosed),
            written = async {
                let mut writer = self.writer.lock().await;
                writer.write_all(&frame).await?;
                writer.flush().await?;
                Ok::<_, Error>(buf.len())
            } => written,
        }
    }

    fn local_addr(&self) -> Result<Address> {
        Ok(self.local.clone())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();
        // Cancellation releases the lock of any pending sender; a sender
        // still holding it is mid-teardown and the half closes on drop.
        if let Ok(mut writer) = self.writer.try_lock() {
            let _ = writer.shutdown().await;
        }
        Ok(())
    }
}
