//! Submission and subscription interface for the broker.
//!
//! The `BrokerHandle` is the cheap-to-clone API the rest of the system uses:
//! sessions, the server layer, and the broker's own analytics worker all
//! submit through it, and the server's broadcaster subscribes through it.

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use netchat_core::ChatMessage;

use super::{BrokerState, StateCell};

/// Errors that can occur when submitting a message.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// The broker has begun shutting down; the message was not enqueued.
    #[error("broker is stopped")]
    Stopped,
}

/// Handle for submitting messages to and subscribing to the broker.
#[derive(Clone)]
pub struct BrokerHandle {
    /// Producer side of the inbound queue
    inbound: mpsc::Sender<ChatMessage>,

    /// Delivery fan-out the outbound worker publishes on
    delivery: broadcast::Sender<ChatMessage>,

    /// Shared lifecycle state
    state: StateCell,

    /// Configured inbound capacity, for the occupancy query
    capacity: usize,
}

impl BrokerHandle {
    pub(crate) fn new(
        inbound: mpsc::Sender<ChatMessage>,
        delivery: broadcast::Sender<ChatMessage>,
        state: StateCell,
        capacity: usize,
    ) -> Self {
        Self {
            inbound,
            delivery,
            state,
            capacity,
        }
    }

    /// Submits a message into the pipeline.
    ///
    /// This is the single ingress point for every message in the system.
    /// The call suspends while the inbound queue is at capacity
    /// (backpressure: a burst of senders is throttled rather than growing
    /// memory without bound).
    ///
    /// # Errors
    ///
    /// [`BrokerError::Stopped`] once shutdown has begun - an observable
    /// rejection, so callers can tell the message was dropped.
    pub async fn submit(&self, msg: ChatMessage) -> Result<(), BrokerError> {
        if self.state.get() != BrokerState::Running {
            return Err(BrokerError::Stopped);
        }

        self.inbound
            .send(msg)
            .await
            .map_err(|_| BrokerError::Stopped)
    }

    /// Subscribes to outbound message delivery.
    ///
    /// The server layer's broadcaster consumes this to write each message
    /// to every connected session.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatMessage> {
        self.delivery.subscribe()
    }

    /// Occupancy of the inbound queue as `(queued, capacity)`.
    ///
    /// Saturation here is the operational alarm for an overloaded server.
    pub fn inbound_occupancy(&self) -> (usize, usize) {
        let free = self.inbound.capacity();
        (self.capacity.saturating_sub(free), self.capacity)
    }

    /// Whether submissions are currently accepted.
    pub fn is_running(&self) -> bool {
        self.state.get() == BrokerState::Running
    }
}
