//! TCP Stream implementation with better address semantics for servers.
//!
//! This module provides a `TcpStream` type that wraps `tokio::net::TcpStream` with
//! better address semantics for servers. When a server accepts a connection, it
//! returns the associated `SocketAddr` along side the stream. On some platforms,
//! this information is not available after the connection is established via
//! `TcpStream::peer_addr`. This module provides a way to retain this information
//! for the lifetime of the stream.

use std::fmt;
use std::io;
use std::mem::MaybeUninit;
use std::net::{Shutdown, SocketAddr};
use std::ops::Deref;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncWrite};
pub use tokio::net::TcpListener;

use crate::info::{ConnectionInfo, HasConnectionInfo};
use crate::stream::Stream;
use crate::transport::TransportKind;

/// Largest number of pending bytes reported by [`Stream::available`].
const PEEK_LIMIT: usize = 64 * 1024;

/// Canonicalize a socket address, converting IPv4-mapped IPv6 addresses
/// into standard IPv4 addresses.
///
/// This function handles the common case where IPv4 clients connecting to
/// dual-stack (IPv4/IPv6) servers appear as IPv4-mapped IPv6 addresses
/// (e.g., `::ffff:192.0.2.1`) and converts them back to regular IPv4
/// addresses (`192.0.2.1`).
pub(crate) fn make_canonical(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        std::net::IpAddr::V4(_) => addr,
        std::net::IpAddr::V6(ip) => {
            if let Some(ip) = ip.to_ipv4_mapped() {
                SocketAddr::new(std::net::IpAddr::V4(ip), addr.port())
            } else {
                addr
            }
        }
    }
}

fn shut_down() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "tcp stream has been shut down")
}

/// A TCP Stream, wrapping `tokio::net::TcpStream` with better
/// address semantics for servers.
#[pin_project::pin_project]
pub struct TcpStream {
    #[pin]
    stream: tokio::net::TcpStream,
    remote: Option<SocketAddr>,
    shutdown: bool,
    // Allocated on the first call to `available` and reused afterwards.
    peek: Mutex<Vec<MaybeUninit<u8>>>,
}

impl fmt::Debug for TcpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.stream.fmt(f)
    }
}

impl TcpStream {
    /// Connect to an address as a client stream
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = tokio::net::TcpStream::connect(addr).await?;
        Ok(Self::new(stream, Some(make_canonical(addr))))
    }

    fn new(stream: tokio::net::TcpStream, remote: Option<SocketAddr>) -> Self {
        Self {
            stream,
            remote,
            shutdown: false,
            peek: Mutex::new(Vec::new()),
        }
    }

    /// Create a new `TcpStream` from an existing `tokio::net::TcpStream` for a client
    /// connection. Client connections should have valid `peer_addr` and `local_addr`.
    pub fn client(inner: tokio::net::TcpStream) -> Self {
        Self::new(inner, None)
    }

    /// Create a new `TcpStream` from an existing `tokio::net::TcpStream` for a server
    /// connection. Server connections should have a valid `local_addr` but may not have a
    /// `peer_addr`, hence the remote address must be provided.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use strand::stream::tcp::TcpStream;
    /// use tokio::net::TcpListener;
    ///
    /// # async fn example() -> std::io::Result<()> {
    /// let listener = TcpListener::bind("127.0.0.1:8080").await?;
    /// let (tokio_stream, remote_addr) = listener.accept().await?;
    /// let stream = TcpStream::server(tokio_stream, remote_addr);
    ///
    /// let peer = stream.peer_addr()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn server(inner: tokio::net::TcpStream, remote: SocketAddr) -> Self {
        Self::new(inner, Some(make_canonical(remote)))
    }

    /// Accept the next connection from a listener as a server stream.
    pub async fn accept(listener: &TcpListener) -> io::Result<Self> {
        let (stream, remote) = listener.accept().await?;
        Ok(Self::server(stream, remote))
    }

    /// Remote address of the connection. See `tokio::net::TcpStream::peer_addr`.
    ///
    /// For servers, this will return the remote address provided when creating the stream,
    /// instead of an `io::Error`.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self.remote {
            Some(addr) => Ok(addr),
            None => self.stream.peer_addr().map(make_canonical),
        }
    }

    /// Local address of the connection. See `tokio::net::TcpStream::local_addr`.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr().map(make_canonical)
    }

    /// Unwraps the `TcpStream`, returning the inner `tokio::net::TcpStream`.
    pub fn into_inner(self) -> tokio::net::TcpStream {
        self.stream
    }
}

impl Deref for TcpStream {
    type Target = tokio::net::TcpStream;
    fn deref(&self) -> &Self::Target {
        &self.stream
    }
}

impl HasConnectionInfo for TcpStream {
    type Addr = SocketAddr;

    fn info(&self) -> io::Result<ConnectionInfo<Self::Addr>> {
        Ok(ConnectionInfo {
            local_addr: self.local_addr()?,
            remote_addr: self.peer_addr()?,
        })
    }
}

impl Stream for TcpStream {
    const KIND: TransportKind = TransportKind::Tcp;

    fn available(&self) -> io::Result<usize> {
        if self.shutdown {
            return Err(shut_down());
        }

        // Peeking a non-blocking socket reports queued bytes without consuming them.
        let mut buf = self.peek.lock();
        if buf.len() < PEEK_LIMIT {
            buf.resize(PEEK_LIMIT, MaybeUninit::uninit());
        }
        match SockRef::from(&self.stream).peek(&mut buf[..]) {
            Ok(n) => Ok(n),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(error) => Err(error),
        }
    }

    fn is_open(&self) -> bool {
        !self.shutdown
    }

    fn teardown(&mut self) -> io::Result<()> {
        if std::mem::replace(&mut self.shutdown, true) {
            return Ok(());
        }

        match SockRef::from(&self.stream).shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // The peer already went away, there is nothing left to release.
            Err(error) if error.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(error) => Err(error),
        }
    }
}

impl AsyncRead for TcpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        if *this.shutdown {
            return Poll::Ready(Err(shut_down()));
        }
        this.stream.poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        let this = self.project();
        if *this.shutdown {
            return Poll::Ready(Err(shut_down()));
        }
        this.stream.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        self.project().stream.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        self.project().stream.poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<Result<usize, io::Error>> {
        let this = self.project();
        if *this.shutdown {
            return Poll::Ready(Err(shut_down()));
        }
        this.stream.poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }
}
