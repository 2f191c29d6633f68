//! Transport abstraction for the per-session duplex connection.
//!
//! The transport/auth layer owns connection establishment; this crate only
//! sees an already-established message-oriented channel through the
//! [`Duplex`] trait. [`pair`] provides an in-memory implementation used by
//! the integration tests and by embedders that run both ends in-process.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Errors raised by a duplex connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is closed (locally or by the peer).
    #[error("connection closed")]
    Closed,

    /// Underlying transport failure.
    #[error("transport failure: {0}")]
    Io(String),
}

/// A full-duplex, message-oriented connection to one client.
///
/// Implementations must serialize concurrent `send` calls internally:
/// frames from different tasks must never interleave on the wire. Within
/// each direction, message order is preserved exactly.
pub trait Duplex: Send + Sync {
    /// Sends one outbound binary frame.
    fn send<'a>(
        &'a self,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

    /// Receives one discrete inbound message.
    ///
    /// Returns `Ok(None)` when the connection has closed cleanly; a blocked
    /// call returns once the connection is closed from either side.
    fn recv<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send + 'a>>;

    /// Closes the connection. Safe to call more than once.
    fn close<'a>(&'a self)
        -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;
}

/// Message capacity of each direction of an in-memory pair.
const MEMORY_CHANNEL_CAPACITY: usize = 256;

/// One endpoint of an in-memory duplex connection.
///
/// Both endpoints share a single close token: closing either side unblocks
/// pending receives on both, mirroring how a socket close is observed by
/// both ends.
pub struct MemoryDuplex {
    tx: mpsc::Sender<Vec<u8>>,
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    closed: CancellationToken,
}

/// Creates a connected in-memory duplex pair.
pub fn pair() -> (MemoryDuplex, MemoryDuplex) {
    let (a_tx, b_rx) = mpsc::channel(MEMORY_CHANNEL_CAPACITY);
    let (b_tx, a_rx) = mpsc::channel(MEMORY_CHANNEL_CAPACITY);
    let closed = CancellationToken::new();

    let a = MemoryDuplex {
        tx: a_tx,
        rx: Mutex::new(a_rx),
        closed: closed.clone(),
    };
    let b = MemoryDuplex {
        tx: b_tx,
        rx: Mutex::new(b_rx),
        closed,
    };
    (a, b)
}

impl Duplex for MemoryDuplex {
    fn send<'a>(
        &'a self,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
        Box::pin(async move {
            if self.closed.is_cancelled() {
                return Err(TransportError::Closed);
            }
            tokio::select! {
                _ = self.closed.cancelled() => Err(TransportError::Closed),
                sent = self.tx.send(data.to_vec()) => {
                    sent.map_err(|_| TransportError::Closed)
                }
            }
        })
    }

    fn recv<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let mut rx = self.rx.lock().await;
            tokio::select! {
                _ = self.closed.cancelled() => Ok(None),
                msg = rx.recv() => Ok(msg),
            }
        })
    }

    fn close<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
        Box::pin(async move {
            self.closed.cancel();
            Ok(())
        })
    }
}
