//! Errors surfaced by connection operations.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::BoxError;

/// An error returned from an operation on a [`Connection`][crate::Connection].
///
/// Local conditions (disposal, timeouts, missing state) are detected before any
/// transport call is made. Everything else originates in the transport and is passed
/// through unchanged.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// The connection was disposed of and can no longer be used.
    #[error("connection has been disposed of")]
    AlreadyDisposed,

    /// Establishing the connection did not finish within the connect timeout.
    #[error("connection attempt timed out after {}ms", .0.as_millis())]
    ConnectTimeout(Duration),

    /// The transport failed to establish the connection.
    #[error("connection failed: {0}")]
    Connect(#[source] BoxError),

    /// The underlying stream failed while reading, writing or tearing down.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The operation requires an open connection.
    #[error("connection is not open")]
    NotOpen,

    /// The connection was opened without a remote address to connect to.
    #[error("no remote address to connect to")]
    MissingAddress,

    /// The operation was abandoned because the connection was closed from a handle.
    #[error("connection closed while the operation was in progress")]
    Aborted,
}

impl ConnectionError {
    /// Wrap a transport establishment error.
    pub(crate) fn connect<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connect(Box::new(error))
    }

    /// Was this error caused by using a disposed connection?
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::AlreadyDisposed)
    }

    /// Was this error caused by the connect timeout elapsing?
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectTimeout(_))
    }

    /// Did this error originate in the transport?
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Io(_))
    }
}

impl From<ConnectionError> for io::Error {
    fn from(value: ConnectionError) -> Self {
        let kind = match &value {
            ConnectionError::ConnectTimeout(_) => io::ErrorKind::TimedOut,
            ConnectionError::NotOpen => io::ErrorKind::NotConnected,
            ConnectionError::Aborted => io::ErrorKind::ConnectionAborted,
            _ => io::ErrorKind::Other,
        };

        match value {
            ConnectionError::Io(error) => error,
            ConnectionError::Connect(source) => match source.downcast::<io::Error>() {
                Ok(original) => *original,
                Err(source) => io::Error::other(source),
            },
            other => io::Error::new(kind, other),
        }
    }
}
