//! TCP transport implementation.
//!
//! This module contains the [`TcpTransport`] type, which is a [`tower::Service`] that connects to
//! remote addresses using TCP. It also contains the [`TcpTransportConfig`] type, which is used to
//! configure the socket before connecting.
//!
//! The connect timeout of a [`Connection`][crate::Connection] bounds the whole attempt; the
//! optional timeout in [`TcpTransportConfig`] applies to the socket connect alone.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::FutureExt as _;
use thiserror::Error;
use tokio::net::TcpSocket;
use tracing::{Instrument, trace, warn};

use crate::BoxError;
use crate::stream::tcp::TcpStream;

/// A TCP connector for client connections.
///
/// This type is a [`tower::Service`] that connects to remote addresses using TCP, making a
/// single connection attempt per call.
#[derive(Clone)]
pub struct TcpTransport {
    config: Arc<TcpTransportConfig>,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport").finish()
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        TcpTransport::new(TcpTransportConfig::default())
    }
}

impl TcpTransport {
    /// Create a new TCP transport
    pub fn new(config: TcpTransportConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Get the configuration for the TCP connector.
    pub fn config(&self) -> &TcpTransportConfig {
        &self.config
    }

    async fn connect_to_addr(&self, addr: SocketAddr) -> Result<TcpStream, TcpConnectionError> {
        let connect = connect(&addr, self.config.connect_timeout, &self.config)?;
        connect.await
    }
}

type BoxFuture<'a, T, E> = crate::BoxFuture<'a, Result<T, E>>;

impl tower::Service<SocketAddr> for TcpTransport {
    type Response = TcpStream;
    type Error = TcpConnectionError;
    type Future = BoxFuture<'static, Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: SocketAddr) -> Self::Future {
        let transport = self.clone();

        let span = tracing::trace_span!("tcp", ip = %req.ip(), port = %req.port());

        async move {
            let stream = transport.connect_to_addr(req).await?;

            if let Ok(peer_addr) = stream.peer_addr() {
                trace!(peer.addr = %peer_addr, "tcp connected");
            } else {
                trace!("tcp connected");
            }

            Ok(stream)
        }
        .instrument(span)
        .boxed()
    }
}

/// Error type for TCP connections.
#[derive(Debug, Error)]
pub struct TcpConnectionError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TcpConnectionError {
    pub(super) fn msg<S, E>(message: S) -> impl FnOnce(E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        move |error| Self {
            message: message.into(),
            source: Some(error.into()),
        }
    }
}

impl fmt::Display for TcpConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref source) = self.source {
            write!(f, "{}: {}", self.message, source)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl From<TcpConnectionError> for io::Error {
    fn from(value: TcpConnectionError) -> Self {
        if let Some(original) = value
            .source
            .as_ref()
            .and_then(|r| r.downcast_ref::<io::Error>())
        {
            io::Error::new(original.kind(), original.to_string())
        } else {
            io::Error::other(value)
        }
    }
}

/// Configuration for TCP connections.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct TcpTransportConfig {
    /// The timeout for the socket connect call.
    pub connect_timeout: Option<Duration>,

    /// The idle time before keep-alive probes are sent.
    pub keep_alive_timeout: Option<Duration>,

    /// The local IPv4 address to bind to.
    pub local_address_ipv4: Option<Ipv4Addr>,

    /// The local IPv6 address to bind to.
    pub local_address_ipv6: Option<Ipv6Addr>,

    /// Whether to disable Nagle's algorithm.
    pub nodelay: bool,

    /// Whether to reuse the local address.
    pub reuse_address: bool,

    /// The size of the send buffer.
    pub send_buffer_size: Option<usize>,

    /// The size of the receive buffer.
    pub recv_buffer_size: Option<usize>,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            keep_alive_timeout: Some(Duration::from_secs(90)),
            local_address_ipv4: None,
            local_address_ipv6: None,
            nodelay: true,
            reuse_address: true,
            send_buffer_size: None,
            recv_buffer_size: None,
        }
    }
}

fn bind_local_address(
    socket: &socket2::Socket,
    dst_addr: &SocketAddr,
    local_addr_ipv4: &Option<Ipv4Addr>,
    local_addr_ipv6: &Option<Ipv6Addr>,
) -> io::Result<()> {
    match (*dst_addr, local_addr_ipv4, local_addr_ipv6) {
        (SocketAddr::V4(_), Some(addr), _) => {
            socket.bind(&SocketAddr::new((*addr).into(), 0).into())?;
        }
        (SocketAddr::V6(_), _, Some(addr)) => {
            socket.bind(&SocketAddr::new((*addr).into(), 0).into())?;
        }
        _ => {}
    }

    Ok(())
}

pub(crate) fn connect(
    addr: &SocketAddr,
    connect_timeout: Option<Duration>,
    config: &TcpTransportConfig,
) -> Result<impl Future<Output = Result<TcpStream, TcpConnectionError>> + use<>, TcpConnectionError>
{
    use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};

    let domain = Domain::for_address(*addr);
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(TcpConnectionError::msg("tcp open error"))?;
    tracing::trace!("tcp socket opened");

    let guard = tracing::trace_span!("socket::options").entered();

    // Tokio requires O_NONBLOCK on sockets it adopts.
    socket
        .set_nonblocking(true)
        .map_err(TcpConnectionError::msg("tcp set_nonblocking error"))?;

    if let Some(dur) = config.keep_alive_timeout {
        let conf = TcpKeepalive::new().with_time(dur);
        if let Err(e) = socket.set_tcp_keepalive(&conf) {
            warn!("tcp set_keepalive error: {}", e);
        }
    }

    if let Err(e) = socket.set_nodelay(config.nodelay) {
        warn!("tcp set_nodelay error: {}", e);
    }

    if config.reuse_address {
        if let Err(e) = socket.set_reuse_address(true) {
            warn!("tcp set_reuse_address error: {}", e);
        }
    }

    if let Some(size) = config.send_buffer_size {
        if let Err(e) = socket.set_send_buffer_size(size) {
            warn!("tcp set_send_buffer_size error: {}", e);
        }
    }

    if let Some(size) = config.recv_buffer_size {
        if let Err(e) = socket.set_recv_buffer_size(size) {
            warn!("tcp set_recv_buffer_size error: {}", e);
        }
    }

    bind_local_address(
        &socket,
        addr,
        &config.local_address_ipv4,
        &config.local_address_ipv6,
    )
    .map_err(TcpConnectionError::msg("tcp bind local address"))?;

    let socket = TcpSocket::from_std_stream(std::net::TcpStream::from(socket));

    drop(guard);

    let addr = *addr;
    let span = tracing::trace_span!("socket::connect", remote.addr = %addr);
    let connect = socket.connect(addr).instrument(span);
    Ok(async move {
        match connect_timeout {
            Some(dur) => match tokio::time::timeout(dur, connect).await {
                Ok(Ok(s)) => Ok(TcpStream::server(s, addr)),
                Ok(Err(e)) => Err(e),
                Err(e) => {
                    tracing::trace!(timeout=?dur, "connection timed out");
                    Err(io::Error::new(io::ErrorKind::TimedOut, e))
                }
            },
            None => connect.await.map(|s| TcpStream::server(s, addr)),
        }
        .map_err(TcpConnectionError::msg("tcp connect error"))
    })
}

#[cfg(test)]
mod test {

    use tokio::net::TcpListener;
    use tower::ServiceExt as _;

    use crate::info::HasConnectionInfo as _;

    use super::*;

    #[tokio::test]
    async fn test_transport() {
        crate::fixtures::subscribe();

        let bind = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = bind.local_addr().unwrap();

        let transport = TcpTransport::default();

        let (stream, _) = tokio::join!(async { transport.oneshot(addr).await.unwrap() }, async {
            bind.accept().await.unwrap()
        });

        let info = stream.info().unwrap();
        assert_eq!(*info.remote_addr(), addr);
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn test_transport_refused() {
        crate::fixtures::subscribe();

        // Bind and drop to find a port nobody listens on.
        let addr = {
            let bind = TcpListener::bind("127.0.0.1:0").await.unwrap();
            bind.local_addr().unwrap()
        };

        let err = TcpTransport::default().oneshot(addr).await.unwrap_err();
        let io: io::Error = err.into();
        assert_eq!(io.kind(), io::ErrorKind::ConnectionRefused);
    }
}
