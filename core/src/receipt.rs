//! Send receipts published after a delivery attempt finishes.
//!
//! The booker consumes these to learn that a payment-expired notification has
//! fired.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire format of a receipt: `{notification_id, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationReceipt {
    /// Id of the notification that was attempted.
    pub notification_id: String,
    /// Its message text.
    pub message: String,
}

/// Errors from publishing a receipt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Broker unreachable or misconfigured.
    #[error("Receipt broker connection failed: {0}")]
    ConnectionFailed(String),

    /// Broker rejected or timed out the record.
    #[error("Failed to publish receipt to topic '{topic}': {reason}")]
    PublishFailed {
        /// Destination topic.
        topic: String,
        /// Broker error.
        reason: String,
    },

    /// Receipt could not be encoded.
    #[error("Failed to encode receipt: {0}")]
    Serialization(String),
}

/// Outbound stream of send receipts.
#[async_trait]
pub trait ReceiptPublisher: Send + Sync {
    /// Publish one receipt.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] if the broker does not accept it.
    async fn publish(&self, receipt: &NotificationReceipt) -> Result<(), PublishError>;
}

/// Inbound stream of send receipts.
///
/// Each receipt arrives as a [`Delivery`](crate::queue::Delivery) whose payload
/// is the receipt JSON. Acknowledging commits the broker offset; a delivery
/// that is never acknowledged is read again after a restart or rebalance.
#[async_trait]
pub trait ReceiptSubscriber: Send + Sync {
    /// Join the consumer group and start streaming receipts.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConsumeFailed`](crate::queue::QueueError::ConsumeFailed)
    /// if the subscription cannot be created.
    async fn subscribe(&self) -> Result<crate::queue::DeliveryStream, crate::queue::QueueError>;
}
