//! Connections wrap a transport with lifecycle management and data envelopes.
//!
//! A [`Connection`] is created closed. [`open`][Connection::open] drives its transport
//! to establish a stream, bounded by the connect timeout. Data moves in
//! [`NetworkData`] envelopes: [`receive`][Connection::receive] performs a single read
//! and [`send`][Connection::send] writes a payload in full.
//!
//! Every operation passes the disposal guard first. Once a connection has been
//! disposed of, operations fail with [`ConnectionError::AlreadyDisposed`] and the
//! stream is never touched again.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures::future::poll_fn;
use tracing::{Instrument as _, trace};

use crate::config::ConnectionConfig;
use crate::data::NetworkData;
use crate::error::ConnectionError;
use crate::info::ConnectionInfo;
use crate::info::HasConnectionInfo as _;
use crate::lifecycle::Lifecycle;
use crate::signal::ConnectionHandle;
use crate::stream::Stream;
use crate::transport::{Transport, TransportKind};

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A streamed connection to a remote peer.
///
/// The connection owns the stream produced by its transport exclusively. Operations take
/// `&mut self`, so calls on one connection never overlap; use a [`ConnectionHandle`] to
/// close or dispose of a connection from another task while an operation is in flight.
pub struct Connection<T, A>
where
    T: Transport<A>,
{
    id: ConnectionId,
    transport: T,
    remote: Option<A>,
    created: SystemTime,
    started: Instant,
    timeout: Duration,
    lifecycle: Lifecycle<T::IO>,
}

impl<T, A> fmt::Debug for Connection<T, A>
where
    T: Transport<A>,
    A: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("remote", &self.remote)
            .field("timeout", &self.timeout)
            .field("open", &self.is_open())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<T, A> Connection<T, A>
where
    T: Transport<A>,
{
    /// Create a closed connection to `remote` using the default connect timeout.
    pub fn new(transport: T, remote: Option<A>) -> Self {
        Self::with_config(transport, remote, ConnectionConfig::default())
    }

    /// Create a closed connection to `remote`.
    pub fn with_config(
        transport: T,
        remote: Option<A>,
        config: impl Into<ConnectionConfig>,
    ) -> Self {
        Self::build(transport, remote, config.into(), None)
    }

    /// Wrap a stream which is already open, such as one accepted by a listener.
    ///
    /// When `remote` is `None`, the peer address reported by the stream is used.
    pub fn established(
        transport: T,
        stream: T::IO,
        remote: Option<A>,
        config: impl Into<ConnectionConfig>,
    ) -> Self {
        let remote = remote.or_else(|| stream.info().ok().map(|info| info.remote_addr));
        Self::build(transport, remote, config.into(), Some(stream))
    }

    fn build(
        transport: T,
        remote: Option<A>,
        config: ConnectionConfig,
        stream: Option<T::IO>,
    ) -> Self {
        let id = ConnectionId::next();
        let kind = <T::IO as Stream>::KIND;
        trace!(%id, %kind, "connection created");
        Self {
            id,
            transport,
            remote,
            created: SystemTime::now(),
            started: Instant::now(),
            timeout: config.connect_timeout,
            lifecycle: Lifecycle::new(stream),
        }
    }

    /// Identifier for this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// When the connection was created.
    pub fn created(&self) -> SystemTime {
        self.created
    }

    /// Time elapsed since the connection was created.
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }

    /// The remote peer.
    pub fn remote(&self) -> Option<&A> {
        self.remote.as_ref()
    }

    /// The connect timeout applied by [`open`][Self::open].
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The kind of transport underneath this connection.
    pub fn kind(&self) -> TransportKind {
        <T::IO as Stream>::KIND
    }

    /// The transport used to open this connection.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether the connection is open. Never fails: a disposed connection is not open.
    pub fn is_open(&self) -> bool {
        self.lifecycle.is_open()
    }

    /// Cheap liveness probe, equivalent to [`is_open`][Self::is_open].
    pub fn peek(&self) -> bool {
        self.is_open()
    }

    /// Whether the connection has been disposed of, here or from a handle.
    pub fn is_disposed(&self) -> bool {
        self.lifecycle.is_disposed()
    }

    /// A handle for closing or disposing of this connection from another task.
    pub fn handle(&self) -> ConnectionHandle {
        self.lifecycle.handle()
    }

    /// Establish the connection.
    ///
    /// Opening an open connection does nothing. A closed connection can be opened again.
    /// The attempt fails with [`ConnectionError::ConnectTimeout`] if the transport does not
    /// finish within the connect timeout, leaving the connection closed.
    pub async fn open(&mut self) -> Result<(), ConnectionError> {
        let raised = self.lifecycle.raised();
        let live = self.lifecycle.enter()?;
        if live.is_open() {
            trace!(id = %self.id, "already open");
            return Ok(());
        }

        let addr = self.remote.as_ref().ok_or(ConnectionError::MissingAddress)?;
        let kind = <T::IO as Stream>::KIND;
        let span = tracing::trace_span!("open", id = %self.id, %kind);
        let transport = &mut self.transport;
        let connect = async move {
            poll_fn(|cx| transport.poll_ready(cx))
                .await
                .map_err(ConnectionError::connect)?;
            transport
                .connect(addr)
                .await
                .map_err(ConnectionError::connect)
        }
        .instrument(span);

        let timeout = self.timeout;
        let outcome = tokio::select! {
            biased;
            signal = raised => Err(signal.into_error()),
            result = tokio::time::timeout(timeout, connect) => match result {
                Ok(result) => result,
                Err(_) => {
                    trace!(id = %self.id, ?timeout, "connect timed out");
                    Err(ConnectionError::ConnectTimeout(timeout))
                }
            },
        };

        match outcome {
            Ok(stream) => {
                live.attach(stream);
                trace!(id = %self.id, "opened");
                Ok(())
            }
            Err(error) => {
                self.lifecycle.settle();
                Err(error)
            }
        }
    }

    /// Close the connection, releasing the stream. Closing a closed connection does nothing.
    pub fn close(&mut self) -> Result<(), ConnectionError> {
        self.lifecycle.enter()?.close()?;
        trace!(id = %self.id, "closed");
        Ok(())
    }

    /// Number of bytes which can be received without waiting. Zero when not open.
    pub fn available(&mut self) -> Result<usize, ConnectionError> {
        self.lifecycle.enter()?.available()
    }

    /// Addresses at both ends of the open stream.
    pub fn info(&mut self) -> Result<ConnectionInfo<A>, ConnectionError> {
        Ok(self.lifecycle.enter()?.stream()?.info()?)
    }

    /// Receive data with a single read of at most
    /// [`RECEIVE_BUFFER_SIZE`][crate::RECEIVE_BUFFER_SIZE] bytes.
    ///
    /// The envelope holds exactly the bytes the read produced, which may be fewer than
    /// are waiting. An empty envelope means the peer closed its end of the stream.
    pub async fn receive(&mut self) -> Result<NetworkData<A>, ConnectionError>
    where
        A: Clone,
    {
        let raised = self.lifecycle.raised();
        let live = self.lifecycle.enter()?;

        let outcome = tokio::select! {
            biased;
            signal = raised => Err(signal.into_error()),
            result = live.read_once() => result,
        };

        match outcome {
            Ok(bytes) => Ok(NetworkData::new(self.remote.clone(), bytes)),
            Err(error) => {
                self.lifecycle.settle();
                Err(error)
            }
        }
    }

    /// Send the payload of `data`, writing exactly [`NetworkData::len`] bytes.
    pub async fn send(&mut self, data: &NetworkData<A>) -> Result<(), ConnectionError> {
        let raised = self.lifecycle.raised();
        let live = self.lifecycle.enter()?;

        let outcome = tokio::select! {
            biased;
            signal = raised => Err(signal.into_error()),
            result = live.write_all(data.payload()) => result,
        };

        if outcome.is_err() {
            self.lifecycle.settle();
        }
        outcome
    }

    /// Dispose of the connection, releasing all of its resources.
    ///
    /// Disposing twice is a no-op. Afterwards every operation except `dispose` and the
    /// liveness queries fails with [`ConnectionError::AlreadyDisposed`].
    pub fn dispose(&mut self) -> Result<(), ConnectionError> {
        self.lifecycle.dispose()?;
        Ok(())
    }
}

impl<T, A> fmt::Display for Connection<T, A>
where
    T: Transport<A>,
    A: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.remote {
            Some(remote) => write!(f, "{remote}/")?,
            None => write!(f, "-/")?,
        }

        match self.created.duration_since(UNIX_EPOCH) {
            Ok(since) => write!(f, "{}.{:09}", since.as_secs(), since.subsec_nanos()),
            Err(_) => write!(f, "?"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use bytes::Bytes;

    use super::*;

    use crate::config::{DEFAULT_CONNECT_TIMEOUT, RECEIVE_BUFFER_SIZE};
    use crate::stream::mock::{MockAddress, MockStream};
    use crate::transport::mock::MockTransport;

    use static_assertions::assert_impl_all;

    assert_impl_all!(Connection<MockTransport, MockAddress>: Send);

    fn connection(stream: &MockStream) -> Connection<MockTransport, MockAddress> {
        Connection::new(MockTransport::stream(stream.clone()), Some(MockAddress))
    }

    async fn opened(stream: &MockStream) -> Connection<MockTransport, MockAddress> {
        let mut conn = connection(stream);
        conn.open().await.unwrap();
        conn
    }

    #[test]
    fn construction_metadata() {
        let before = SystemTime::now();
        let conn = connection(&MockStream::new());
        let after = SystemTime::now();

        assert_eq!(conn.timeout(), DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(conn.remote(), Some(&MockAddress));
        assert_eq!(conn.kind(), TransportKind::Mock);

        let created = conn.created();
        assert!(created >= before && created <= after);
        assert!(created <= SystemTime::now());
        assert_eq!(conn.created(), created);

        let custom = Connection::with_config(
            MockTransport::error(),
            Some(MockAddress),
            Duration::from_millis(250),
        );
        assert_eq!(custom.timeout(), Duration::from_millis(250));
        assert_ne!(custom.id(), conn.id());
    }

    #[test]
    fn display_uses_remote_and_creation_time() {
        let conn = connection(&MockStream::new());
        let rendered = conn.to_string();
        assert!(rendered.starts_with("mock/"), "{rendered}");

        let anonymous: Connection<MockTransport, MockAddress> =
            Connection::new(MockTransport::error(), None);
        assert!(anonymous.to_string().starts_with("-/"));
    }

    #[tokio::test]
    async fn open_and_close() {
        crate::fixtures::subscribe();

        let stream = MockStream::new();
        let mut conn = connection(&stream);
        assert!(!conn.is_open());
        assert!(!conn.peek());

        conn.open().await.unwrap();
        assert!(conn.is_open());
        assert!(conn.peek());

        conn.open().await.unwrap();
        assert_eq!(conn.transport().connects(), 1, "open is a no-op when open");

        conn.close().unwrap();
        assert!(!conn.is_open());
        conn.close().unwrap();
        assert_eq!(stream.teardowns(), 1);

        assert!(matches!(
            conn.receive().await.unwrap_err(),
            ConnectionError::NotOpen
        ));
        assert_eq!(conn.available().unwrap(), 0);
    }

    #[tokio::test]
    async fn open_without_remote() {
        let mut conn: Connection<MockTransport, MockAddress> =
            Connection::new(MockTransport::stream(MockStream::new()), None);
        assert!(matches!(
            conn.open().await.unwrap_err(),
            ConnectionError::MissingAddress
        ));
        assert_eq!(conn.transport().connects(), 0);
    }

    #[tokio::test]
    async fn open_failure_passes_through() {
        let mut conn = Connection::new(MockTransport::error(), Some(MockAddress));
        let err = conn.open().await.unwrap_err();
        assert!(err.is_transport());
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn open_times_out() {
        let mut conn = Connection::with_config(
            MockTransport::hang(),
            Some(MockAddress),
            Duration::from_millis(20),
        );

        let err = conn.open().await.unwrap_err();
        assert!(err.is_timeout(), "{err}");
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn receive_returns_exactly_what_was_read() {
        let stream = MockStream::new();
        stream.push_read(vec![9u8; 37]);
        let mut conn = opened(&stream).await;

        let data = conn.receive().await.unwrap();
        assert_eq!(data.len(), 37);
        assert_eq!(data.buffer().len(), 37);
        assert_eq!(data.payload(), &[9u8; 37][..]);
        assert_eq!(data.remote(), Some(&MockAddress));
    }

    #[tokio::test]
    async fn receive_reads_once() {
        let stream = MockStream::new();
        stream.push_read(vec![1u8; 1500]);
        let mut conn = opened(&stream).await;

        let first = conn.receive().await.unwrap();
        assert_eq!(first.len(), RECEIVE_BUFFER_SIZE);
        assert_eq!(stream.reads(), 1);

        let second = conn.receive().await.unwrap();
        assert_eq!(second.len(), 1500 - RECEIVE_BUFFER_SIZE);

        stream.finish();
        let eof = conn.receive().await.unwrap();
        assert!(eof.is_empty());
    }

    #[tokio::test]
    async fn receive_error_passes_through() {
        let stream = MockStream::new();
        stream.push_error(io::ErrorKind::ConnectionReset);
        let mut conn = opened(&stream).await;

        match conn.receive().await.unwrap_err() {
            ConnectionError::Io(error) => assert_eq!(error.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected error: {other}"),
        }
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn send_writes_declared_length() {
        let stream = MockStream::new();
        stream.limit_writes(4);
        let mut conn = opened(&stream).await;

        let mut buffer = vec![0u8; 4096];
        buffer[..10].copy_from_slice(b"0123456789");
        let payload = NetworkData::with_length(Some(MockAddress), buffer, 10).unwrap();

        conn.send(&payload).await.unwrap();
        assert_eq!(stream.written(), b"0123456789");

        conn.send(&NetworkData::new(None, Bytes::from_static(b"!")))
            .await
            .unwrap();
        assert_eq!(stream.written(), b"0123456789!");
    }

    #[tokio::test]
    async fn disposed_connection_rejects_everything() {
        let stream = MockStream::new();
        stream.push_read(vec![1u8; 8]);
        let mut conn = opened(&stream).await;

        conn.dispose().unwrap();
        let calls = stream.calls();
        let connects = conn.transport().connects();
        assert_eq!(stream.teardowns(), 1);

        assert!(!conn.is_open());
        assert!(!conn.peek());
        assert!(conn.is_disposed());

        assert!(conn.open().await.unwrap_err().is_disposed());
        assert!(conn.receive().await.unwrap_err().is_disposed());
        let payload = NetworkData::new(None, Bytes::from_static(b"x"));
        assert!(conn.send(&payload).await.unwrap_err().is_disposed());
        assert!(conn.close().unwrap_err().is_disposed());
        assert!(conn.available().unwrap_err().is_disposed());
        assert!(conn.info().unwrap_err().is_disposed());

        conn.dispose().unwrap();
        let transport = conn.transport().clone();
        drop(conn);

        assert_eq!(stream.calls(), calls, "no stream calls after disposal");
        assert_eq!(transport.connects(), connects, "no connects after disposal");
        assert_eq!(stream.teardowns(), 1);
    }

    #[tokio::test]
    async fn drop_tears_down_once() {
        let stream = MockStream::new();
        let conn = opened(&stream).await;
        drop(conn);
        assert_eq!(stream.teardowns(), 1);
    }

    #[tokio::test]
    async fn close_from_handle_unblocks_receive() {
        crate::fixtures::subscribe();

        let first = MockStream::new();
        let second = MockStream::new();
        let mut conn = Connection::new(
            MockTransport::streams([first.clone(), second.clone()]),
            Some(MockAddress),
        );
        conn.open().await.unwrap();
        let handle = conn.handle();

        let pending = tokio::spawn(async move {
            let result = conn.receive().await;
            (conn, result)
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.close());

        let (mut conn, result) = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("receive hung after close")
            .unwrap();

        assert!(matches!(result.unwrap_err(), ConnectionError::Aborted));
        assert!(!conn.is_open());
        assert_eq!(first.teardowns(), 1);

        conn.open().await.unwrap();
        assert!(conn.is_open());
        second.push_read(&b"again"[..]);
        assert_eq!(conn.receive().await.unwrap().payload(), b"again");
    }

    #[tokio::test]
    async fn dispose_from_handle_unblocks_receive() {
        let stream = MockStream::new();
        let mut conn = opened(&stream).await;
        let handle = conn.handle();

        let pending = tokio::spawn(async move {
            let result = conn.receive().await;
            (conn, result)
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.dispose());
        assert!(handle.is_disposed());

        let (mut conn, result) = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("receive hung after dispose")
            .unwrap();

        assert!(result.unwrap_err().is_disposed());
        assert!(conn.is_disposed());
        assert_eq!(stream.teardowns(), 1);
        assert!(conn.receive().await.unwrap_err().is_disposed());
        conn.dispose().unwrap();
        assert_eq!(stream.teardowns(), 1);
    }

    #[tokio::test]
    async fn close_from_handle_unblocks_send() {
        let stream = MockStream::new();
        stream.stall_writes();
        let mut conn = opened(&stream).await;
        let handle = conn.handle();

        let pending = tokio::spawn(async move {
            let payload = NetworkData::new(Some(MockAddress), Bytes::from_static(b"stuck"));
            conn.send(&payload).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.close();

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("send hung after close")
            .unwrap();
        assert!(matches!(result.unwrap_err(), ConnectionError::Aborted));
    }

    #[tokio::test]
    async fn dispose_from_handle_unblocks_send() {
        let stream = MockStream::new();
        stream.stall_writes();
        let mut conn = opened(&stream).await;
        let handle = conn.handle();

        let pending = tokio::spawn(async move {
            let payload = NetworkData::new(Some(MockAddress), Bytes::from_static(b"stuck"));
            let result = conn.send(&payload).await;
            (conn, result)
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.dispose());

        let (mut conn, result) = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("send hung after dispose")
            .unwrap();
        assert!(result.unwrap_err().is_disposed());
        assert!(conn.is_disposed());
        assert_eq!(stream.teardowns(), 1);

        let calls = stream.calls();
        let connects = conn.transport().connects();
        let payload = NetworkData::new(None, Bytes::from_static(b"x"));
        assert!(conn.send(&payload).await.unwrap_err().is_disposed());
        assert!(conn.open().await.unwrap_err().is_disposed());
        assert_eq!(stream.calls(), calls);
        assert_eq!(conn.transport().connects(), connects);
    }

    #[tokio::test]
    async fn dispose_from_handle_aborts_open() {
        let mut conn = Connection::with_config(
            MockTransport::hang(),
            Some(MockAddress),
            Duration::from_secs(30),
        );
        let handle = conn.handle();

        let pending = tokio::spawn(async move { conn.open().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.dispose();

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("open hung after dispose")
            .unwrap();
        assert!(result.unwrap_err().is_disposed());
    }

    #[cfg(feature = "duplex")]
    #[tokio::test]
    async fn duplex_connection() {
        use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

        use crate::stream::duplex::{self, DuplexAddr};
        use crate::transport::duplex::DuplexTransport;

        let (client, mut incoming) = duplex::pair();
        let mut conn = Connection::new(DuplexTransport::new(64, client), Some(DuplexAddr::new()));
        assert_eq!(conn.kind(), TransportKind::Duplex);

        conn.open().await.unwrap();
        let mut peer = incoming.accept().await.unwrap();
        assert_eq!(conn.info().unwrap().remote_addr, DuplexAddr::new());

        conn.send(&NetworkData::new(None, Bytes::from_static(b"ping")))
            .await
            .unwrap();
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        peer.write_all(b"pong").await.unwrap();
        let data = conn.receive().await.unwrap();
        assert_eq!(data.payload(), b"pong");
        assert_eq!(data.remote(), Some(&DuplexAddr::new()));

        conn.dispose().unwrap();
        assert_eq!(conn.kind(), TransportKind::Duplex);
        assert_eq!(peer.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn established_stream_is_open() {
        let stream = MockStream::new();
        stream.push_read(&b"hi"[..]);

        let mut conn = Connection::established(
            MockTransport::error(),
            stream.clone(),
            None,
            ConnectionConfig::default(),
        );
        assert!(conn.is_open());
        assert_eq!(conn.remote(), Some(&MockAddress));
        assert_eq!(conn.available().unwrap(), 2);

        let data = conn.receive().await.unwrap();
        assert_eq!(data.payload(), b"hi");
    }
}
