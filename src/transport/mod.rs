//! Transports for establishing connections to remote peers.
//!
//! Transports are responsible for establishing a connection to a remote peer and
//! handing back an open [`Stream`]. A [`Connection`][crate::Connection] drives the
//! transport when it is opened and owns the stream afterwards.

use std::fmt;
use std::future::Future;

use tower::Service;

use crate::stream::Stream;

#[cfg(feature = "duplex")]
pub mod duplex;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod tcp;

/// Identifies the kind of transport underneath a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TransportKind {
    /// A TCP socket.
    Tcp,

    /// An in-memory stream pair.
    Duplex,

    /// A scripted stream used in tests.
    #[cfg(any(test, feature = "mock"))]
    Mock,
}

impl TransportKind {
    /// The lowercase name of this transport kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Duplex => "duplex",
            #[cfg(any(test, feature = "mock"))]
            TransportKind::Mock => "mock",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transport establishes streams to a remote address.
///
/// To implement a transport, implement a [`tower::Service`] which accepts an address and
/// returns a [`Stream`] whose connection info uses the same address type.
pub trait Transport<A>: Send {
    /// The type of stream produced by this transport
    type IO: Stream<Addr = A>;

    /// Error returned when connection fails
    type Error: std::error::Error + Send + Sync + 'static;

    /// The future type returned by this transport
    type Future: Future<Output = Result<Self::IO, <Self as Transport<A>>::Error>> + Send + 'static;

    /// Connect to a remote peer and return a stream.
    fn connect(&mut self, addr: &A) -> <Self as Transport<A>>::Future;

    /// Poll the transport to see if it is ready to make a new connection.
    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), <Self as Transport<A>>::Error>>;
}

impl<T, IO, A, F, E> Transport<A> for T
where
    T: Service<A, Response = IO, Future = F, Error = E>,
    T: Clone + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
    F: Future<Output = Result<IO, E>> + Send + 'static,
    IO: Stream<Addr = A>,
    A: Clone,
{
    type IO = IO;
    type Error = E;
    type Future = F;

    fn connect(&mut self, addr: &A) -> Self::Future {
        self.call(addr.clone())
    }

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), <Self as Transport<A>>::Error>> {
        Service::poll_ready(self, cx)
    }
}
