//! Synchronous access to a connection.
//!
//! [`BlockingConnection`] owns a single-threaded runtime and blocks on the async
//! operations of the [`Connection`] it wraps. It must not be used from within an async
//! context, since blocking on a runtime from inside another runtime panics.

use std::fmt;
use std::io;
use std::time::{Duration, SystemTime};

use tokio::runtime::{Builder, Runtime};
use tracing::warn;

use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionId};
use crate::data::NetworkData;
use crate::error::ConnectionError;
use crate::signal::ConnectionHandle;
use crate::transport::{Transport, TransportKind};

/// A connection whose operations block the calling thread.
pub struct BlockingConnection<T, A>
where
    T: Transport<A>,
{
    // Declared first so the stream is released before its runtime shuts down.
    inner: Connection<T, A>,
    runtime: Runtime,
}

impl<T, A> fmt::Debug for BlockingConnection<T, A>
where
    T: Transport<A>,
    A: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlockingConnection")
            .field(&self.inner)
            .finish()
    }
}

impl<T, A> BlockingConnection<T, A>
where
    T: Transport<A>,
{
    /// Create a closed connection to `remote`.
    pub fn new(
        transport: T,
        remote: Option<A>,
        config: impl Into<ConnectionConfig>,
    ) -> io::Result<Self> {
        Self::from_connection(Connection::with_config(transport, remote, config))
    }

    /// Drive an existing connection synchronously.
    ///
    /// Streams are bound to the runtime which opened them. A connection opened on another
    /// runtime only keeps working while that runtime is running, so pass a closed
    /// connection and [`open`][Self::open] it here.
    pub fn from_connection(inner: Connection<T, A>) -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { inner, runtime })
    }

    /// The wrapped connection.
    pub fn get_ref(&self) -> &Connection<T, A> {
        &self.inner
    }

    /// Identifier for this connection.
    pub fn id(&self) -> ConnectionId {
        self.inner.id()
    }

    /// When the connection was created.
    pub fn created(&self) -> SystemTime {
        self.inner.created()
    }

    /// The remote peer.
    pub fn remote(&self) -> Option<&A> {
        self.inner.remote()
    }

    /// The connect timeout.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout()
    }

    /// The kind of transport underneath this connection.
    pub fn kind(&self) -> TransportKind {
        self.inner.kind()
    }

    /// Whether the connection is open.
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// Cheap liveness probe, equivalent to [`is_open`][Self::is_open].
    pub fn peek(&self) -> bool {
        self.inner.peek()
    }

    /// A handle for closing or disposing of this connection from another thread.
    pub fn handle(&self) -> ConnectionHandle {
        self.inner.handle()
    }

    /// Establish the connection, blocking until it opens, fails, or times out.
    pub fn open(&mut self) -> Result<(), ConnectionError> {
        self.runtime.block_on(self.inner.open())
    }

    /// Close the connection.
    pub fn close(&mut self) -> Result<(), ConnectionError> {
        self.inner.close()
    }

    /// Number of bytes which can be received without blocking.
    pub fn available(&mut self) -> Result<usize, ConnectionError> {
        self.inner.available()
    }

    /// Block until a single read completes.
    pub fn receive(&mut self) -> Result<NetworkData<A>, ConnectionError>
    where
        A: Clone,
    {
        self.runtime.block_on(self.inner.receive())
    }

    /// Block until the whole payload has been written.
    pub fn send(&mut self, data: &NetworkData<A>) -> Result<(), ConnectionError> {
        self.runtime.block_on(self.inner.send(data))
    }

    /// Dispose of the connection.
    pub fn dispose(&mut self) -> Result<(), ConnectionError> {
        self.inner.dispose()
    }

    /// Unwrap the connection, dropping the runtime.
    ///
    /// The stream was opened on the runtime being dropped, so the connection is closed
    /// first. [`Connection::open`] re-establishes it on the caller's runtime.
    pub fn into_inner(mut self) -> Connection<T, A> {
        match self.inner.close() {
            Ok(()) => {}
            Err(error) if error.is_disposed() => {}
            Err(error) => warn!(%error, "closing stream before leaving its runtime failed"),
        }
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read as _, Write as _};
    use std::net::SocketAddr;

    use super::*;

    use crate::config::DEFAULT_CONNECT_TIMEOUT;
    use crate::stream::mock::{MockAddress, MockStream};
    use crate::transport::mock::MockTransport;
    use crate::transport::tcp::TcpTransport;

    #[test]
    fn blocking_mock_roundtrip() {
        let stream = MockStream::new();
        stream.push_read(vec![5u8; 37]);

        let mut conn = BlockingConnection::new(
            MockTransport::stream(stream.clone()),
            Some(MockAddress),
            ConnectionConfig::default(),
        )
        .unwrap();
        assert_eq!(conn.timeout(), DEFAULT_CONNECT_TIMEOUT);
        assert!(!conn.is_open());

        conn.open().unwrap();
        assert!(conn.peek());

        let data = conn.receive().unwrap();
        assert_eq!(data.len(), 37);

        conn.send(&data).unwrap();
        assert_eq!(stream.written(), vec![5u8; 37]);

        conn.dispose().unwrap();
        conn.dispose().unwrap();
        assert_eq!(stream.teardowns(), 1);
        assert!(conn.receive().unwrap_err().is_disposed());
    }

    #[test]
    fn blocking_tcp_echo() {
        crate::fixtures::subscribe();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).unwrap();
            socket.write_all(&buf).unwrap();
        });

        let mut conn =
            BlockingConnection::new(TcpTransport::default(), Some(addr), Duration::from_secs(5))
                .unwrap();
        assert_eq!(conn.kind(), TransportKind::Tcp);

        conn.open().unwrap();
        conn.send(&NetworkData::new(Some(addr), b"hello".to_vec()))
            .unwrap();

        let mut echoed = Vec::new();
        while echoed.len() < 5 {
            let data = conn.receive().unwrap();
            assert!(!data.is_empty());
            assert_eq!(data.remote(), Some(&addr));
            echoed.extend_from_slice(data.payload());
        }
        assert_eq!(echoed, b"hello");

        server.join().unwrap();
        conn.close().unwrap();
        assert!(!conn.is_open());
    }

    #[test]
    fn into_inner_closes_stream_bound_to_runtime() {
        crate::fixtures::subscribe();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            for _ in 0..2 {
                let (mut socket, _) = listener.accept().unwrap();
                let mut buf = [0u8; 4];
                socket.read_exact(&mut buf).unwrap();
                socket.write_all(&buf).unwrap();
            }
        });

        let mut conn =
            BlockingConnection::new(TcpTransport::default(), Some(addr), Duration::from_secs(5))
                .unwrap();
        conn.open().unwrap();
        conn.send(&NetworkData::new(None, b"once".to_vec())).unwrap();
        assert_eq!(read_echo(&mut conn), b"once");

        let mut inner = conn.into_inner();
        assert!(!inner.is_open());
        assert!(!inner.is_disposed());

        let runtime = Builder::new_current_thread().enable_all().build().unwrap();
        let echoed = runtime.block_on(async {
            inner.open().await.unwrap();
            inner
                .send(&NetworkData::new(None, b"more".to_vec()))
                .await
                .unwrap();

            let mut echoed = Vec::new();
            while echoed.len() < 4 {
                let data = inner.receive().await.unwrap();
                assert!(!data.is_empty());
                echoed.extend_from_slice(data.payload());
            }
            echoed
        });
        assert_eq!(echoed, b"more");

        server.join().unwrap();
        inner.dispose().unwrap();
    }

    fn read_echo<T, A>(conn: &mut BlockingConnection<T, A>) -> Vec<u8>
    where
        T: Transport<A>,
        A: Clone,
    {
        let mut echoed = Vec::new();
        while echoed.len() < 4 {
            let data = conn.receive().unwrap();
            assert!(!data.is_empty());
            echoed.extend_from_slice(data.payload());
        }
        echoed
    }
}
