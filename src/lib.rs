//! # Strand: lifecycle-safe streamed connections
//!
//! Strand wraps byte-stream transports (TCP sockets, in-memory pipes, or anything else
//! which can produce an async stream) in a [`Connection`] with a single, uniform
//! lifecycle. The connection owns its stream, tracks when it was created and who it
//! talks to, and guarantees that nothing touches the stream once it has been disposed of.
//!
//! ## Architecture Overview
//!
//! The library separates establishing a stream from managing it:
//!
//! - **Transport**: establishes a stream to a remote address. Any [`tower::Service`]
//!   which turns an address into a [`Stream`] is a transport.
//! - **Stream**: the open byte stream, exposing async reads and writes plus the handful
//!   of synchronous capabilities lifecycle management needs (pending bytes, liveness,
//!   teardown).
//! - **Connection**: composes the two. Opening drives the transport under a connect
//!   timeout; receiving and sending move data in [`NetworkData`] envelopes; disposal
//!   releases everything exactly once.
//!
//! ## Lifecycle
//!
//! A connection starts closed. [`Connection::open`] establishes the stream, and
//! [`Connection::close`] releases it; a closed connection can be opened again.
//! [`Connection::dispose`] ends the connection for good. Every operation passes through
//! a single disposal guard, so a disposed connection answers every call with
//! [`ConnectionError::AlreadyDisposed`] and never calls into its stream again.
//! Dropping a connection without disposing of it releases the stream as a last resort.
//!
//! Operations take `&mut self`, so calls on one connection never overlap. To stop a
//! connection from elsewhere, take a [`ConnectionHandle`]: closing or disposing through
//! a handle resolves any operation in flight instead of leaving it waiting forever.
//!
//! ## Data
//!
//! [`Connection::receive`] performs exactly one read of at most [`RECEIVE_BUFFER_SIZE`]
//! bytes and returns exactly the bytes that read produced. [`Connection::send`] writes the
//! declared length of an envelope, which may be shorter than its backing buffer. There
//! is no framing and no retrying: both belong to the caller.
//!
//! ## Feature Flags
//!
//! - `blocking`: Enables [`BlockingConnection`], which drives a connection from
//!   synchronous code on its own runtime
//! - `duplex`: Provides in-memory duplex streams and their transport
//! - `mock`: Provides scripted streams and transports for testing

use std::pin::Pin;

#[cfg(feature = "blocking")]
pub mod blocking;
pub mod config;
pub mod connection;
pub mod data;
pub mod error;
pub mod info;
mod lifecycle;
mod signal;
pub mod stream;
pub mod transport;

#[cfg(feature = "blocking")]
pub use self::blocking::BlockingConnection;
pub use self::config::{ConnectionConfig, DEFAULT_CONNECT_TIMEOUT, RECEIVE_BUFFER_SIZE};
pub use self::connection::{Connection, ConnectionId};
pub use self::data::{DataError, NetworkData};
pub use self::error::ConnectionError;
pub use self::signal::ConnectionHandle;
pub use self::stream::Stream;
pub use self::transport::{Transport, TransportKind};

#[allow(dead_code)]
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
#[allow(dead_code)]
type BoxError = Box<dyn std::error::Error + Send + Sync>;
