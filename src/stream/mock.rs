//! A scripted stream, suitable for testing behavior of stream-dependent code.
//!
//! Reads are served from a queue of chunks pushed by the test. Every call the stream
//! receives is counted, so tests can assert exactly how a connection used it.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll, Waker};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::info::{ConnectionInfo, HasConnectionInfo};
use crate::stream::Stream;
use crate::transport::TransportKind;

/// Address used by mock streams.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MockAddress;

impl fmt::Display for MockAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("mock")
    }
}

#[derive(Debug, Default)]
struct Script {
    incoming: VecDeque<Result<Bytes, io::ErrorKind>>,
    eof: bool,
    written: Vec<u8>,
    write_chunk: Option<usize>,
    stall_writes: bool,
    torn_down: bool,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

impl Script {
    fn wake(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
        if let Some(waker) = self.write_waker.take() {
            waker.wake();
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicUsize,
    writes: AtomicUsize,
    flushes: AtomicUsize,
    available: AtomicUsize,
    teardowns: AtomicUsize,
}

#[derive(Debug, Default)]
struct Shared {
    script: Mutex<Script>,
    counters: Counters,
}

/// A stream whose reads are scripted and whose calls are recorded.
///
/// Clones share the same script and counters, so a test can keep a clone to inspect a
/// stream after handing it to a connection.
#[derive(Debug, Clone, Default)]
pub struct MockStream {
    shared: Arc<Shared>,
}

impl MockStream {
    /// Create an empty stream. Reads wait until data is pushed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a chunk to be returned by a single read.
    ///
    /// A read returns at most the space available in the caller's buffer; the rest of the
    /// chunk is served by the following read.
    pub fn push_read(&self, chunk: impl Into<Bytes>) {
        let mut script = self.shared.script.lock();
        script.incoming.push_back(Ok(chunk.into()));
        script.wake();
    }

    /// Queue an error to be returned by a single read.
    pub fn push_error(&self, kind: io::ErrorKind) {
        let mut script = self.shared.script.lock();
        script.incoming.push_back(Err(kind));
        script.wake();
    }

    /// Signal end of stream once all queued chunks are consumed.
    pub fn finish(&self) {
        let mut script = self.shared.script.lock();
        script.eof = true;
        script.wake();
    }

    /// Accept at most `limit` bytes per write call.
    pub fn limit_writes(&self, limit: usize) {
        self.shared.script.lock().write_chunk = Some(limit);
    }

    /// Make writes wait forever (until teardown).
    pub fn stall_writes(&self) {
        self.shared.script.lock().stall_writes = true;
    }

    /// All bytes written to the stream so far.
    pub fn written(&self) -> Vec<u8> {
        self.shared.script.lock().written.clone()
    }

    /// Number of times the stream was polled for reading.
    pub fn reads(&self) -> usize {
        self.shared.counters.reads.load(Ordering::SeqCst)
    }

    /// Number of times the stream was polled for writing.
    pub fn writes(&self) -> usize {
        self.shared.counters.writes.load(Ordering::SeqCst)
    }

    /// Number of times the stream was torn down.
    pub fn teardowns(&self) -> usize {
        self.shared.counters.teardowns.load(Ordering::SeqCst)
    }

    /// Total number of calls made against the stream.
    pub fn calls(&self) -> usize {
        let counters = &self.shared.counters;
        counters.reads.load(Ordering::SeqCst)
            + counters.writes.load(Ordering::SeqCst)
            + counters.flushes.load(Ordering::SeqCst)
            + counters.available.load(Ordering::SeqCst)
            + counters.teardowns.load(Ordering::SeqCst)
    }
}

fn torn_down() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "mock stream has been torn down")
}

impl HasConnectionInfo for MockStream {
    type Addr = MockAddress;

    fn info(&self) -> io::Result<ConnectionInfo<Self::Addr>> {
        Ok(ConnectionInfo::default())
    }
}

impl Stream for MockStream {
    const KIND: TransportKind = TransportKind::Mock;

    fn available(&self) -> io::Result<usize> {
        self.shared.counters.available.fetch_add(1, Ordering::SeqCst);
        let script = self.shared.script.lock();
        if script.torn_down {
            return Err(torn_down());
        }

        Ok(script
            .incoming
            .iter()
            .map(|chunk| chunk.as_ref().map_or(0, Bytes::len))
            .sum())
    }

    fn is_open(&self) -> bool {
        !self.shared.script.lock().torn_down
    }

    fn teardown(&mut self) -> io::Result<()> {
        self.shared.counters.teardowns.fetch_add(1, Ordering::SeqCst);
        let mut script = self.shared.script.lock();
        script.torn_down = true;
        script.wake();
        Ok(())
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.shared.counters.reads.fetch_add(1, Ordering::SeqCst);
        let mut script = self.shared.script.lock();
        if script.torn_down {
            return Poll::Ready(Err(torn_down()));
        }

        match script.incoming.pop_front() {
            Some(Ok(mut chunk)) => {
                let n = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk.split_to(n));
                if !chunk.is_empty() {
                    script.incoming.push_front(Ok(chunk));
                }
                Poll::Ready(Ok(()))
            }
            Some(Err(kind)) => Poll::Ready(Err(kind.into())),
            None if script.eof => Poll::Ready(Ok(())),
            None => {
                script.read_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        self.shared.counters.writes.fetch_add(1, Ordering::SeqCst);
        let mut script = self.shared.script.lock();
        if script.torn_down {
            return Poll::Ready(Err(torn_down()));
        }

        if script.stall_writes {
            script.write_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }

        let n = script.write_chunk.map_or(buf.len(), |limit| limit.min(buf.len()));
        script.written.extend_from_slice(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        self.shared.counters.flushes.fetch_add(1, Ordering::SeqCst);
        if self.shared.script.lock().torn_down {
            return Poll::Ready(Err(torn_down()));
        }
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(MockStream: Stream, Send, Sync, Clone);

    #[tokio::test]
    async fn reads_follow_script() {
        let mut stream = MockStream::new();
        stream.push_read(&b"abcdef"[..]);
        stream.push_error(io::ErrorKind::ConnectionReset);
        stream.finish();

        assert_eq!(stream.available().unwrap(), 6);

        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(stream.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");

        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);

        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
        assert_eq!(stream.reads(), 4);
    }

    #[tokio::test]
    async fn writes_are_recorded() {
        let mut stream = MockStream::new();
        stream.limit_writes(3);

        stream.write_all(b"hello").await.unwrap();
        assert_eq!(stream.written(), b"hello");
        assert_eq!(stream.writes(), 2);
    }

    #[tokio::test]
    async fn teardown_wakes_pending_read() {
        let mut stream = MockStream::new();
        let mut observer = stream.clone();

        let pending = tokio::spawn(async move {
            let mut buf = [0u8; 4];
            stream.read(&mut buf).await
        });

        tokio::task::yield_now().await;
        observer.teardown().unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert_eq!(observer.teardowns(), 1);
        assert!(!observer.is_open());
    }
}
