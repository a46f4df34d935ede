//! Durable queue port.
//!
//! An at-least-once FIFO of encoded notification envelopes. Every delivery
//! must be explicitly acknowledged; an unacknowledged delivery is redelivered
//! after a consumer crash.

use async_trait::async_trait;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use thiserror::Error;

/// Errors from the durable queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Could not connect or open a channel.
    #[error("Queue connection failed: {0}")]
    ConnectionFailed(String),

    /// Broker rejected or did not confirm a publish.
    #[error("Queue publish failed: {0}")]
    PublishFailed(String),

    /// Consumer registration or delivery failed.
    #[error("Queue consume failed: {0}")]
    ConsumeFailed(String),

    /// Ack or nack could not be sent.
    #[error("Queue acknowledgement failed: {0}")]
    AckFailed(String),
}

/// Stream of deliveries from a queue.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, QueueError>> + Send>>;

/// Broker-side handle used to settle one delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Positive acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AckFailed`] if the broker cannot be told.
    async fn ack(&self) -> Result<(), QueueError>;

    /// Negative acknowledgement, optionally asking for redelivery.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AckFailed`] if the broker cannot be told.
    async fn nack(&self, requeue: bool) -> Result<(), QueueError>;
}

/// One message received from the queue.
pub struct Delivery {
    payload: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Wrap a payload with the handle that settles it.
    #[must_use]
    pub fn new(payload: Vec<u8>, acker: impl Acknowledger + 'static) -> Self {
        Self {
            payload,
            acker: Box::new(acker),
        }
    }

    /// Raw envelope bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Acknowledge the delivery.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AckFailed`] on broker failure.
    pub async fn ack(self) -> Result<(), QueueError> {
        self.acker.ack().await
    }

    /// Reject the delivery.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AckFailed`] on broker failure.
    pub async fn nack(self, requeue: bool) -> Result<(), QueueError> {
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// At-least-once queue of ready-to-send envelopes.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Publish one envelope. Returns once the broker has accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::PublishFailed`] if the broker rejects it.
    async fn publish(&self, payload: &[u8]) -> Result<(), QueueError>;

    /// Start consuming. The stream ends when the broker connection closes.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the consumer cannot be registered.
    async fn consume(&self) -> Result<DeliveryStream, QueueError>;
}
