//! Recording fakes for route and router tests

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

use crate::common::{Address, Network, Result, Stream};
use crate::error::Error;
use crate::protocol::Connector;
use crate::transport::Dialer;

use super::{Client, Hop, Node};

/// Event log and live-stream counter shared by the fakes of one test.
#[derive(Default)]
pub(crate) struct Recorder {
    events: Mutex<Vec<String>>,
    live: AtomicUsize,
}

impl Recorder {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push(&self, event: String) {
        self.events.lock().push(event);
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.events.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }

    /// Streams handed out by fake dialers and not yet dropped
    pub(crate) fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// In-memory stream that reports its drop to the recorder
pub(crate) struct TrackedStream {
    inner: DuplexStream,
    _peer: DuplexStream,
    recorder: Arc<Recorder>,
}

impl TrackedStream {
    fn new(recorder: Arc<Recorder>) -> Self {
        let (inner, peer) = tokio::io::duplex(64);
        recorder.live.fetch_add(1, Ordering::SeqCst);
        Self {
            inner,
            _peer: peer,
            recorder,
        }
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.recorder.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

pub(crate) struct FakeDialer {
    pub(crate) name: String,
    pub(crate) recorder: Arc<Recorder>,
    /// Fail every dial with this many failures before succeeding
    pub(crate) failures: AtomicUsize,
    pub(crate) handshake_delay: Option<Duration>,
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial(&self, addr: &Address) -> Result<Stream> {
        self.recorder.push(format!("dial {} {}", self.name, addr));
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Transport(format!("{} unreachable", self.name)));
        }
        Ok(Box::new(TrackedStream::new(Arc::clone(&self.recorder))))
    }

    async fn handshake(&self, stream: Stream, _addr: &Address) -> Result<Stream> {
        self.recorder.push(format!("transport {}", self.name));
        if let Some(delay) = self.handshake_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(stream)
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

pub(crate) struct FakeConnector {
    pub(crate) name: String,
    pub(crate) recorder: Arc<Recorder>,
    pub(crate) reject: bool,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn handshake(&self, stream: Stream) -> Result<Stream> {
        self.recorder.push(format!("handshake {}", self.name));
        Ok(stream)
    }

    async fn connect(&self, stream: Stream, network: Network, addr: &Address) -> Result<Stream> {
        self.recorder.push(format!("connect {} {} {}", self.name, network, addr));
        if self.reject {
            return Err(Error::Rejected(format!("{} refused {}", self.name, addr)));
        }
        Ok(stream)
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

pub(crate) fn node_addr(name: &str) -> Address {
    Address::domain(format!("{}.proxy", name), 1080)
}

pub(crate) fn fake_dialer(name: &str, recorder: &Arc<Recorder>) -> FakeDialer {
    FakeDialer {
        name: name.to_string(),
        recorder: Arc::clone(recorder),
        failures: AtomicUsize::new(0),
        handshake_delay: None,
    }
}

pub(crate) fn fake_connector(name: &str, recorder: &Arc<Recorder>) -> FakeConnector {
    FakeConnector {
        name: name.to_string(),
        recorder: Arc::clone(recorder),
        reject: false,
    }
}

pub(crate) fn hop_with(name: &str, dialer: FakeDialer, connector: FakeConnector) -> Hop {
    Hop::new(
        Arc::new(Node::new(name, node_addr(name))),
        Client::new(Arc::new(dialer), Arc::new(connector)),
    )
}

pub(crate) fn hop(name: &str, recorder: &Arc<Recorder>) -> Hop {
    hop_with(name, fake_dialer(name, recorder), fake_connector(name, recorder))
}
