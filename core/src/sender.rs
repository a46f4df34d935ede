//! Channel sender port.

use crate::notification::Notification;
use async_trait::async_trait;
use thiserror::Error;

/// Outcome of a failed delivery attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Transient failure; the consumer schedules a retry.
    #[error("{0}")]
    Retryable(String),

    /// The notification can never be delivered; the consumer marks it Failed.
    #[error("{0}")]
    Permanent(String),
}

impl SendError {
    /// Whether the consumer should schedule another attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Transport-specific delivery, registered per channel tag.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Channel tag this sender serves.
    fn name(&self) -> &str;

    /// Deliver `notification.message` to `notification.recipient`.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Retryable`] for transient failures and
    /// [`SendError::Permanent`] when retrying cannot help.
    async fn send(&self, notification: &Notification) -> Result<(), SendError>;
}
