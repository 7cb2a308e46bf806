//! Duplex transport for in-process peers

use std::io;
use std::task::{Context, Poll};

use crate::BoxFuture;

use crate::stream::duplex::{DuplexAddr, DuplexClient, DuplexStream};

/// Transport via duplex stream
#[derive(Debug, Clone)]
pub struct DuplexTransport {
    max_buf_size: usize,
    client: DuplexClient,
}

impl DuplexTransport {
    /// Create a new `DuplexTransport`
    pub fn new(max_buf_size: usize, client: DuplexClient) -> Self {
        Self {
            max_buf_size,
            client,
        }
    }
}

impl tower::Service<DuplexAddr> for DuplexTransport {
    type Response = DuplexStream;

    type Error = io::Error;

    type Future = BoxFuture<'static, Result<DuplexStream, io::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: DuplexAddr) -> Self::Future {
        let client = self.client.clone();
        let max_buf_size = self.max_buf_size;
        let fut = async move {
            let stream = client.connect(max_buf_size).await?;
            Ok(stream)
        };

        Box::pin(fut)
    }
}
