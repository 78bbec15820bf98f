//! Event fan-out.
//!
//! One broadcast channel per connection. Every subscriber sees every event
//! published after it subscribed, in publication order. A subscriber that
//! falls more than `capacity` events behind loses the oldest ones.

use crate::error::{ErrorKind, LinkError};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Something observers may want to know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SerialEvent {
    /// Connection state after a connect or disconnect attempt.
    StatusChanged { connected: bool },
    ErrorOccurred { kind: ErrorKind, message: String },
    /// Bytes drained from the input queue.
    PacketReady { bytes: Vec<u8> },
    /// An interval tick found nothing to drain.
    PacketEmpty,
}

impl SerialEvent {
    /// Error event for `err`, or `None` if `err` is never published.
    pub fn from_error(err: &LinkError) -> Option<Self> {
        err.kind().map(|kind| Self::ErrorOccurred {
            kind,
            message: err.to_string(),
        })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "status_changed",
            Self::ErrorOccurred { .. } => "error_occurred",
            Self::PacketReady { .. } => "packet_ready",
            Self::PacketEmpty => "packet_empty",
        }
    }
}

/// Publishing side of the event channel.
#[derive(Debug, Clone)]
pub struct EventNotifier {
    tx: broadcast::Sender<SerialEvent>,
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: SerialEvent) {
        // Send errors just mean nobody is subscribed.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving side held by one observer.
#[derive(Debug)]
pub struct EventSubscription {
    rx: broadcast::Receiver<SerialEvent>,
}

impl EventSubscription {
    /// Next event, or `None` once every notifier is gone.
    pub async fn recv(&mut self) -> Option<SerialEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-published event, without waiting.
    pub fn try_recv(&mut self) -> Option<SerialEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Everything published so far that this subscriber has not seen.
    pub fn drain(&mut self) -> Vec<SerialEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
