//! Lifecycle state for a connection.
//!
//! The stream and its I/O buffers live in [`Live`], which only exists until the
//! connection is disposed of. The single way to reach it is [`Lifecycle::enter`], which
//! applies signals raised by [`ConnectionHandle`]s and rejects disposed connections
//! before any stream call can happen.

use std::future::Future;
use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tracing::{debug, trace, warn};

use crate::config::RECEIVE_BUFFER_SIZE;
use crate::error::ConnectionError;
use crate::signal::{self, ConnectionHandle, Signal, Signals};
use crate::stream::Stream;

/// Resources held by a connection which has not been disposed of.
#[derive(Debug)]
pub(crate) struct Live<IO> {
    stream: Option<IO>,
    scratch: BytesMut,
}

impl<IO> Live<IO>
where
    IO: Stream,
{
    fn new(stream: Option<IO>) -> Self {
        Self {
            stream,
            scratch: BytesMut::new(),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.stream.as_ref().is_some_and(Stream::is_open)
    }

    pub(crate) fn stream(&self) -> Result<&IO, ConnectionError> {
        self.stream.as_ref().ok_or(ConnectionError::NotOpen)
    }

    fn stream_mut(&mut self) -> Result<&mut IO, ConnectionError> {
        self.stream.as_mut().ok_or(ConnectionError::NotOpen)
    }

    /// Adopt a freshly opened stream.
    pub(crate) fn attach(&mut self, stream: IO) {
        if let Some(mut previous) = self.stream.replace(stream) {
            if let Err(error) = previous.teardown() {
                warn!(%error, "teardown of replaced stream failed");
            }
        }
    }

    /// Bytes readable without waiting, or zero when not open.
    pub(crate) fn available(&self) -> Result<usize, ConnectionError> {
        match &self.stream {
            Some(stream) => Ok(stream.available()?),
            None => Ok(0),
        }
    }

    /// Perform exactly one read into the scratch buffer, returning the bytes read.
    pub(crate) async fn read_once(&mut self) -> Result<Bytes, ConnectionError> {
        let stream = self.stream.as_mut().ok_or(ConnectionError::NotOpen)?;

        self.scratch.clear();
        self.scratch.resize(RECEIVE_BUFFER_SIZE, 0);
        let n = stream.read(&mut self.scratch[..]).await?;
        trace!(bytes = n, "read");

        Ok(self.scratch.split_to(n).freeze())
    }

    /// Write every byte of `payload`, then flush.
    pub(crate) async fn write_all(&mut self, payload: &[u8]) -> Result<(), ConnectionError> {
        let stream = self.stream_mut()?;
        stream.write_all(payload).await?;
        stream.flush().await?;
        trace!(bytes = payload.len(), "wrote");
        Ok(())
    }

    /// Tear down the stream, if one is open. Closing twice is a no-op.
    pub(crate) fn close(&mut self) -> io::Result<()> {
        match self.stream.take() {
            Some(mut stream) => {
                let result = stream.teardown();
                trace!("stream closed");
                result
            }
            None => Ok(()),
        }
    }

    /// Release everything: I/O buffers first, then the stream itself.
    fn release(mut self) -> io::Result<()> {
        drop(std::mem::take(&mut self.scratch));
        self.close()
    }
}

/// Connection state: live until disposed of, with signals from handles.
#[derive(Debug)]
pub(crate) struct Lifecycle<IO>
where
    IO: Stream,
{
    live: Option<Live<IO>>,
    signals: Signals,
}

impl<IO> Lifecycle<IO>
where
    IO: Stream,
{
    pub(crate) fn new(stream: Option<IO>) -> Self {
        Self {
            live: Some(Live::new(stream)),
            signals: signal::channel(),
        }
    }

    /// Check the connection is usable, and get access to its resources.
    ///
    /// Pending handle signals are applied first, so a connection closed from a handle is
    /// closed here and one disposed of from a handle is released here.
    pub(crate) fn enter(&mut self) -> Result<&mut Live<IO>, ConnectionError> {
        self.settle();
        self.live.as_mut().ok_or(ConnectionError::AlreadyDisposed)
    }

    /// Apply any signal raised by a handle.
    pub(crate) fn settle(&mut self) {
        match self.signals.pending() {
            Signal::Idle => {}
            Signal::Close => {
                if let Some(live) = self.live.as_mut() {
                    if let Err(error) = live.close() {
                        warn!(%error, "teardown after close request failed");
                    }
                }
                self.signals.acknowledge_close();
            }
            Signal::Dispose => {
                if let Err(error) = self.dispose() {
                    warn!(%error, "teardown after dispose request failed");
                }
            }
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.signals.pending() == Signal::Idle && self.live.as_ref().is_some_and(Live::is_open)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.live.is_none() || self.signals.pending() == Signal::Dispose
    }

    /// A future resolving when a handle raises a signal.
    pub(crate) fn raised(&self) -> impl Future<Output = Signal> + Send + 'static {
        self.signals.raised()
    }

    pub(crate) fn handle(&self) -> ConnectionHandle {
        self.signals.handle()
    }

    /// Dispose of the connection. Only the first call releases anything.
    pub(crate) fn dispose(&mut self) -> io::Result<()> {
        self.signals.disposed();
        match self.live.take() {
            Some(live) => {
                debug!("disposing");
                live.release()
            }
            None => Ok(()),
        }
    }
}

impl<IO> Drop for Lifecycle<IO>
where
    IO: Stream,
{
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            debug!("connection dropped without being disposed of");
            if let Err(error) = live.release() {
                warn!(%error, "teardown of dropped connection failed");
            }
        }
    }
}
