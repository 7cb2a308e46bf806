//! In-memory duplex streams.
//!
//! A [`DuplexClient`] and [`DuplexIncoming`] pair behave like a connector and a listener
//! living in the same process. Each connection creates a fresh [`tokio::io::duplex`]
//! pipe, handing one half to the client and the other to the listener.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::info::{ConnectionInfo, HasConnectionInfo};
use crate::stream::Stream;
use crate::transport::TransportKind;

/// Address of a duplex stream. All duplex streams share the same address.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DuplexAddr {
    _private: (),
}

impl DuplexAddr {
    /// Create a new duplex address.
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl fmt::Display for DuplexAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("duplex")
    }
}

fn torn_down() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "duplex stream has been torn down")
}

/// One end of an in-memory pipe.
#[derive(Debug)]
pub struct DuplexStream {
    inner: Option<tokio::io::DuplexStream>,
}

impl DuplexStream {
    fn new(inner: tokio::io::DuplexStream) -> Self {
        Self { inner: Some(inner) }
    }

    fn inner(&mut self) -> io::Result<&mut tokio::io::DuplexStream> {
        self.inner.as_mut().ok_or_else(torn_down)
    }
}

impl HasConnectionInfo for DuplexStream {
    type Addr = DuplexAddr;

    fn info(&self) -> io::Result<ConnectionInfo<Self::Addr>> {
        Ok(ConnectionInfo::duplex())
    }
}

impl Stream for DuplexStream {
    const KIND: TransportKind = TransportKind::Duplex;

    fn available(&self) -> io::Result<usize> {
        // The pipe does not expose its buffered length.
        match self.inner {
            Some(_) => Ok(0),
            None => Err(torn_down()),
        }
    }

    fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    fn teardown(&mut self) -> io::Result<()> {
        // Dropping our half closes the pipe for the peer.
        self.inner.take();
        Ok(())
    }
}

impl AsyncRead for DuplexStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().inner() {
            Ok(inner) => Pin::new(inner).poll_read(cx, buf),
            Err(error) => Poll::Ready(Err(error)),
        }
    }
}

impl AsyncWrite for DuplexStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        match self.get_mut().inner() {
            Ok(inner) => Pin::new(inner).poll_write(cx, buf),
            Err(error) => Poll::Ready(Err(error)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        match self.get_mut().inner() {
            Ok(inner) => Pin::new(inner).poll_flush(cx),
            Err(error) => Poll::Ready(Err(error)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        match self.get_mut().inner() {
            Ok(inner) => Pin::new(inner).poll_shutdown(cx),
            Err(_) => Poll::Ready(Ok(())),
        }
    }
}

/// Connecting side of an in-memory listener.
#[derive(Debug, Clone)]
pub struct DuplexClient {
    sender: mpsc::Sender<DuplexStream>,
}

impl DuplexClient {
    /// Open a new pipe with the given per-direction buffer size, delivering the far
    /// end to the paired [`DuplexIncoming`].
    pub async fn connect(&self, max_buf_size: usize) -> io::Result<DuplexStream> {
        let (client, server) = tokio::io::duplex(max_buf_size);
        self.sender
            .send(DuplexStream::new(server))
            .await
            .map_err(|_| {
                io::Error::new(io::ErrorKind::ConnectionRefused, "duplex listener closed")
            })?;
        tracing::trace!("duplex connected");
        Ok(DuplexStream::new(client))
    }
}

/// Listening side of an in-memory listener.
#[derive(Debug)]
pub struct DuplexIncoming {
    receiver: mpsc::Receiver<DuplexStream>,
}

impl DuplexIncoming {
    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> io::Result<DuplexStream> {
        self.receiver.recv().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "all duplex clients dropped")
        })
    }
}

/// Create a connected client/listener pair.
pub fn pair() -> (DuplexClient, DuplexIncoming) {
    let (sender, receiver) = mpsc::channel(32);
    (DuplexClient { sender }, DuplexIncoming { receiver })
}
