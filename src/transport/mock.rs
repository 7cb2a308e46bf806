//! A transport handing out scripted streams, suitable for testing connection behavior.

use std::collections::VecDeque;
use std::future::{pending, ready};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use thiserror::Error;

use crate::BoxFuture;
use crate::stream::mock::{MockAddress, MockStream};

/// An error that can occur when connecting a mock transport.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("connection error")]
pub struct MockConnectionError;

#[derive(Debug, Clone)]
enum TransportMode {
    Stream(MockStream),
    Queue(Arc<Mutex<VecDeque<MockStream>>>),
    ConnectionError,
    Hang,
}

/// A mock transport that can be used to test connection behavior.
#[derive(Debug, Clone)]
pub struct MockTransport {
    mode: TransportMode,
    connects: Arc<AtomicUsize>,
}

impl MockTransport {
    fn new(mode: TransportMode) -> Self {
        Self {
            mode,
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Transport which connects to the given stream. Every connection shares the stream's script.
    pub fn stream(stream: MockStream) -> Self {
        Self::new(TransportMode::Stream(stream))
    }

    /// Transport which hands out the given streams in order, then fails once they run out.
    pub fn streams(streams: impl IntoIterator<Item = MockStream>) -> Self {
        Self::new(TransportMode::Queue(Arc::new(Mutex::new(
            streams.into_iter().collect(),
        ))))
    }

    /// Transport which returns an error during connection attempts
    pub fn error() -> Self {
        Self::new(TransportMode::ConnectionError)
    }

    /// Transport whose connection attempts never finish
    pub fn hang() -> Self {
        Self::new(TransportMode::Hang)
    }

    /// Number of connection attempts made through this transport and its clones.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl tower::Service<MockAddress> for MockTransport {
    type Response = MockStream;

    type Error = MockConnectionError;

    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: MockAddress) -> Self::Future {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            TransportMode::Stream(stream) => Box::pin(ready(Ok(stream.clone()))),
            TransportMode::Queue(streams) => {
                Box::pin(ready(streams.lock().pop_front().ok_or(MockConnectionError)))
            }
            TransportMode::ConnectionError => Box::pin(ready(Err(MockConnectionError))),
            TransportMode::Hang => Box::pin(pending()),
        }
    }
}

#[cfg(test)]
mod tests {

    use crate::stream::Stream as _;
    use crate::transport::Transport;

    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(MockConnectionError: std::error::Error, Send, Sync);
    assert_impl_all!(MockTransport: Transport<MockAddress>);

    #[tokio::test]
    async fn modes() {
        let stream = MockStream::new();
        let mut transport = MockTransport::stream(stream.clone());
        let connected = transport.connect(&MockAddress).await.unwrap();
        connected.push_read(&b"x"[..]);
        assert_eq!(stream.available().unwrap(), 1);

        let mut failing = MockTransport::error();
        assert_eq!(
            failing.connect(&MockAddress).await.unwrap_err(),
            MockConnectionError
        );
        assert_eq!(failing.connects(), 1);

        let first = MockStream::new();
        let mut queued = MockTransport::streams([first.clone()]);
        queued.connect(&MockAddress).await.unwrap().push_read(&b"yz"[..]);
        assert_eq!(first.available().unwrap(), 2);
        assert!(queued.connect(&MockAddress).await.is_err());

        let mut hanging = MockTransport::hang();
        let attempt = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            hanging.connect(&MockAddress),
        )
        .await;
        assert!(attempt.is_err());
    }
}
