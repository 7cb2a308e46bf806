//! Connection configuration.

use std::time::Duration;

/// The connect timeout used when a connection is created without one.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Size of the scratch buffer used for a single receive.
pub const RECEIVE_BUFFER_SIZE: usize = 1024;

/// Configuration for a [`Connection`][crate::Connection].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ConnectionConfig {
    /// Upper bound on establishing the connection in [`open`][crate::Connection::open].
    pub connect_timeout: Duration,
}

impl ConnectionConfig {
    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl From<Duration> for ConnectionConfig {
    fn from(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl From<Option<Duration>> for ConnectionConfig {
    fn from(connect_timeout: Option<Duration>) -> Self {
        Self {
            connect_timeout: connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        }
    }
}
