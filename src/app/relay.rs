//! Byte and datagram relays between two connections

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::trace;

use crate::common::{bufpool, Result, Stream};
use crate::error::Error;
use crate::udp::UdpConn;

/// Copy buffer size for stream relays
const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// Relay bytes both ways until both directions finish.
///
/// Returns `(up, down)`: bytes copied from `inbound` to `outbound` and back.
pub async fn relay_stream(inbound: Stream, outbound: Stream) -> Result<(u64, u64)> {
    let (mut in_read, mut in_write) = tokio::io::split(inbound);
    let (mut out_read, mut out_write) = tokio::io::split(outbound);

    // Upload: client → server
    let upload = async move {
        let mut buf = bufpool::get(RELAY_BUFFER_SIZE);
        let mut total: u64 = 0;

        loop {
            let n = match in_read.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if out_write.write_all(&buf[..n]).await.is_err() || out_write.flush().await.is_err() {
                break;
            }
            total += n as u64;
        }

        let _ = out_write.shutdown().await;
        bufpool::put(buf);
        total
    };

    // Download: server → client
    let download = async move {
        let mut buf = bufpool::get(RELAY_BUFFER_SIZE);
        let mut total: u64 = 0;

        loop {
            let n = match out_read.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if in_write.write_all(&buf[..n]).await.is_err() || in_write.flush().await.is_err() {
                break;
            }
            total += n as u64;
        }

        let _ = in_write.shutdown().await;
        bufpool::put(buf);
        total
    };

    let (up, down) = tokio::join!(upload, download);
    Ok((up, down))
}

/// Relay datagrams between a pseudo-connection and a datagram-preserving
/// stream (one read or write per datagram).
///
/// Ends as soon as either side fails or closes, which includes idle
/// eviction of `conn`. Returns `(up, down)` datagram counts.
pub async fn relay_datagrams(conn: UdpConn, remote: Stream, buffer_size: usize) -> Result<(u64, u64)> {
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);
    let peer = conn.peer_addr().clone();

    let upload = async {
        let mut buf = bufpool::get(buffer_size);
        let mut count: u64 = 0;
        let result = loop {
            let n = match conn.recv(&mut buf).await {
                Ok(n) => n,
                Err(Error::ConnectionClosed) => break Ok(()),
                Err(e) => break Err(e),
            };
            trace!("udp relay: {} bytes from {}", n, peer);
            if let Err(e) = remote_write.write_all(&buf[..n]).await {
                break Err(e.into());
            }
            count += 1;
        };
        bufpool::put(buf);
        result.map(|_| count)
    };

    let download = async {
        let mut buf = bufpool::get(buffer_size);
        let mut count: u64 = 0;
        let result = loop {
            let n = match remote_read.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) => break Err(e.into()),
            };
            trace!("udp relay: {} bytes to {}", n, peer);
            match conn.send(&buf[..n]).await {
                Ok(_) => count += 1,
                Err(Error::ConnectionClosed) => break Ok(()),
                Err(e) => break Err(e),
            }
            if conn.is_closed() {
                break Ok(());
            }
        };
        bufpool::put(buf);
        result.map(|_| count)
    };

    let result = tokio::select! {
        up = upload => up.map(|up| (up, 0)),
        down = download => down.map(|down| (0, down)),
    };
    conn.close();
    result
}

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}KB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}
