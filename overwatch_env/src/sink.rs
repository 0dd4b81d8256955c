//! Output sink abstraction for published fusion/assignment snapshots.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::Envelope;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// Abstraction for pushing snapshots to external consumers.
///
/// # Implementations
///
/// - **Production**: a WebSocket/HTTP push layer outside this workspace
/// - **In-process**: `BroadcastSink`, a tokio broadcast channel
///
/// # Flow
///
/// ```text
/// Coordinator                 Sink                    Consumer
///   |                           |                          |
///   |-- publish(envelope) ----->|                          |
///   |                           |-- fan out -------------->|
///   |                           |                          |-- recv() -> envelope
/// ```
#[async_trait]
pub trait OutputSink: Send + Sync + 'static {
    /// Publishes an envelope.
    ///
    /// # Returns
    /// * `Ok(n)` - number of consumers the envelope was handed to (may be 0)
    /// * `Err(EnvError::SinkClosed)` - the sink was shut down
    async fn publish(&self, envelope: Envelope) -> Result<usize, EnvError>;

    /// True once the sink will accept no further envelopes.
    fn is_closed(&self) -> bool;
}

/// In-process fan-out sink backed by `tokio::sync::broadcast`.
///
/// Slow subscribers lag and lose the oldest envelopes rather than blocking
/// the publisher.
pub struct BroadcastSink {
    tx: broadcast::Sender<Envelope>,
    closed: AtomicBool,
}

impl BroadcastSink {
    /// Creates a sink buffering up to `capacity` envelopes per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns a new receiver that sees every envelope published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Shuts the sink down; later publishes fail with `SinkClosed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl OutputSink for BroadcastSink {
    async fn publish(&self, envelope: Envelope) -> Result<usize, EnvError> {
        if self.is_closed() {
            return Err(EnvError::closed(envelope.topic));
        }
        // send() only fails when nobody is subscribed, which is not an error here
        Ok(self.tx.send(envelope).unwrap_or(0))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
