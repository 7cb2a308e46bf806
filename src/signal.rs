//! Cross-task close and dispose signals for a connection.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::ConnectionError;

/// A request raised against a connection from outside its owning task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Idle,
    Close,
    Dispose,
}

impl Signal {
    /// The error an in-flight operation resolves with when this signal interrupts it.
    pub(crate) fn into_error(self) -> ConnectionError {
        match self {
            Signal::Dispose => ConnectionError::AlreadyDisposed,
            Signal::Close | Signal::Idle => ConnectionError::Aborted,
        }
    }
}

/// The connection's side of the signal channel.
#[derive(Debug)]
pub(crate) struct Signals {
    tx: Arc<watch::Sender<Signal>>,
    rx: watch::Receiver<Signal>,
}

impl Signals {
    /// The currently pending signal.
    pub(crate) fn pending(&self) -> Signal {
        *self.rx.borrow()
    }

    /// Clear a pending close once it has been acted upon. A pending dispose is sticky.
    pub(crate) fn acknowledge_close(&self) {
        self.tx.send_if_modified(|signal| {
            if *signal == Signal::Close {
                *signal = Signal::Idle;
                true
            } else {
                false
            }
        });
    }

    /// Record that the connection has been disposed of.
    pub(crate) fn disposed(&self) {
        raise(&self.tx, Signal::Dispose);
    }

    /// A future which resolves with the next signal raised.
    ///
    /// The future holds no borrow of the connection, so it can race an operation which
    /// borrows the stream.
    pub(crate) fn raised(&self) -> impl Future<Output = Signal> + Send + 'static {
        let mut rx = self.rx.clone();
        async move {
            match rx.wait_for(|signal| *signal != Signal::Idle).await {
                Ok(signal) => *signal,
                Err(_) => Signal::Dispose,
            }
        }
    }

    pub(crate) fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            tx: self.tx.clone(),
        }
    }
}

fn raise(tx: &watch::Sender<Signal>, raised: Signal) -> bool {
    tx.send_if_modified(|signal| match (*signal, raised) {
        (Signal::Dispose, _) => false,
        (Signal::Close, Signal::Close) => false,
        _ => {
            *signal = raised;
            true
        }
    })
}

/// A handle which can close or dispose of a connection from another task.
///
/// Operations in flight on the connection resolve promptly when a handle raises a
/// signal: with [`ConnectionError::Aborted`] after [`close`][Self::close], and with
/// [`ConnectionError::AlreadyDisposed`] after [`dispose`][Self::dispose]. The owning
/// connection releases its stream the next time it runs.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: Arc<watch::Sender<Signal>>,
}

impl ConnectionHandle {
    /// Ask the connection to close. Returns `false` if a close or dispose is already pending.
    pub fn close(&self) -> bool {
        let raised = raise(&self.tx, Signal::Close);
        if raised {
            tracing::trace!("close requested");
        }
        raised
    }

    /// Dispose of the connection. Returns `false` if it was already disposed of.
    pub fn dispose(&self) -> bool {
        let raised = raise(&self.tx, Signal::Dispose);
        if raised {
            tracing::trace!("dispose requested");
        }
        raised
    }

    /// Whether the connection has been disposed of, or a dispose has been requested.
    pub fn is_disposed(&self) -> bool {
        *self.tx.borrow() == Signal::Dispose
    }
}

pub(crate) fn channel() -> Signals {
    let (tx, rx) = watch::channel(Signal::Idle);
    Signals {
        tx: Arc::new(tx),
        rx,
    }
}
