//! Byte streams carried by a connection.
//!
//! A [`Stream`] is the open half of a transport: once a [`Transport`][crate::Transport]
//! has established a connection, the resulting stream supplies the raw read and write
//! primitives (via [`AsyncRead`] and [`AsyncWrite`]) along with the few synchronous
//! capabilities a [`Connection`][crate::Connection] needs to manage its lifecycle.
//!
//! # Modules
//!
//! - [`tcp`] - TCP stream wrapper with improved address semantics for servers
//! - [`duplex`] - In-memory stream pairs, useful for tests and in-process peers
//! - [`mock`] - Scripted stream which records every call made against it
//!
//! # Examples
//!
//! ```rust,no_run
//! use strand::stream::tcp::TcpStream;
//! use tokio::net::TcpListener;
//!
//! # async fn example() -> std::io::Result<()> {
//! let listener = TcpListener::bind("127.0.0.1:8080").await?;
//! let (stream, addr) = listener.accept().await?;
//! let tcp_stream = TcpStream::server(stream, addr);
//!
//! // Server streams retain the remote address even when
//! // the underlying socket can't provide it
//! let remote = tcp_stream.peer_addr()?;
//! # Ok(())
//! # }
//! ```

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::info::HasConnectionInfo;
use crate::transport::TransportKind;

#[cfg(feature = "duplex")]
pub mod duplex;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod tcp;

/// An open, bidirectional byte stream.
pub trait Stream: AsyncRead + AsyncWrite + HasConnectionInfo + Unpin + Send + 'static {
    /// The kind of transport which produces this stream.
    const KIND: TransportKind;

    /// Number of bytes which can be read right now without waiting.
    ///
    /// This is best-effort: a stream which cannot tell reports `0`.
    fn available(&self) -> io::Result<usize>;

    /// Whether the stream still considers itself open.
    fn is_open(&self) -> bool;

    /// Release the underlying handle.
    ///
    /// After teardown the stream must fail further reads and writes rather than block.
    /// Called at most once by a connection, immediately before the stream is dropped.
    fn teardown(&mut self) -> io::Result<()>;
}
