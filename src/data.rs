//! Data envelopes exchanged with a connection.

use bytes::Bytes;
use thiserror::Error;

/// Error building a [`NetworkData`] envelope.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DataError {
    /// The declared length does not fit in the backing buffer.
    #[error("declared length {length} exceeds buffer of {capacity} bytes")]
    LengthExceedsBuffer {
        /// The declared payload length.
        length: usize,

        /// The size of the backing buffer.
        capacity: usize,
    },
}

/// Represents bytes which have been received from, or are ready to be sent to, a peer.
///
/// The envelope pairs a backing buffer with a declared length and the peer address. Only
/// the first `len()` bytes of the buffer are payload; the buffer may be larger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkData<A> {
    buffer: Bytes,
    length: usize,
    remote: Option<A>,
}

impl<A> NetworkData<A> {
    /// Creates an envelope whose payload is the entire buffer.
    pub fn new(remote: Option<A>, buffer: impl Into<Bytes>) -> Self {
        let buffer = buffer.into();
        Self {
            length: buffer.len(),
            buffer,
            remote,
        }
    }

    /// Creates an envelope whose payload is the first `length` bytes of `buffer`.
    pub fn with_length(
        remote: Option<A>,
        buffer: impl Into<Bytes>,
        length: usize,
    ) -> Result<Self, DataError> {
        let buffer = buffer.into();
        if length > buffer.len() {
            return Err(DataError::LengthExceedsBuffer {
                length,
                capacity: buffer.len(),
            });
        }

        Ok(Self {
            buffer,
            length,
            remote,
        })
    }

    /// The full backing buffer, including any bytes past the declared length.
    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    /// The payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.buffer[..self.length]
    }

    /// Number of payload bytes.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The peer this data came from or is headed to.
    pub fn remote(&self) -> Option<&A> {
        self.remote.as_ref()
    }

    /// Returns the payload and peer address, dropping any bytes past the declared length.
    pub fn into_parts(self) -> (Bytes, Option<A>) {
        let mut buffer = self.buffer;
        buffer.truncate(self.length);
        (buffer, self.remote)
    }
}

impl<A> From<(Vec<u8>, A)> for NetworkData<A> {
    fn from((data, remote): (Vec<u8>, A)) -> Self {
        NetworkData::new(Some(remote), data)
    }
}

impl<A> From<(Bytes, A)> for NetworkData<A> {
    fn from((data, remote): (Bytes, A)) -> Self {
        NetworkData::new(Some(remote), data)
    }
}
