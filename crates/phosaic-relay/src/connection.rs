//! Connection handles owned by the relay.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::mpsc;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-local identifier of one signaling connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound queue full")]
    QueueFull,
    #[error("connection closed")]
    Closed,
}

/// Sending half of a peer's outbound frame queue.
///
/// Cloning is cheap; the writer task ends once every clone is dropped.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self {
            id: ConnectionId::next(),
            tx,
        }
    }

    /// Creates a handle together with the receiver a writer task drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a frame without waiting.
    pub fn try_deliver(&self, frame: String) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let (a, _ra) = ConnectionHandle::channel(1);
        let (b, _rb) = ConnectionHandle::channel(1);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn delivery_to_dropped_receiver_fails_safely() {
        let (handle, rx) = ConnectionHandle::channel(4);
        drop(rx);
        assert!(handle.is_closed());
        assert_eq!(handle.try_deliver("x".into()), Err(DeliveryError::Closed));
    }

    #[test]
    fn full_queue_is_a_miss() {
        let (handle, _rx) = ConnectionHandle::channel(1);
        handle.try_deliver("first".into()).unwrap();
        assert_eq!(handle.try_deliver("second".into()), Err(DeliveryError::QueueFull));
    }
}
