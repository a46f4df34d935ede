//! Port through which the booker schedules and cancels notifications.

use crate::notification::{Notification, NotificationRequest};
use async_trait::async_trait;
use thiserror::Error;

/// Errors from the notifier API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifierClientError {
    /// Connection, timeout or other transport failure.
    #[error("Notifier transport error: {0}")]
    Transport(String),

    /// The notifier answered with a non-success status.
    #[error("Notifier returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Server-provided error message.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("Invalid notifier response: {0}")]
    InvalidResponse(String),
}

/// Outbound notifier API.
#[async_trait]
pub trait NotifierClient: Send + Sync {
    /// Schedule a notification (`POST /notify`). Not idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`NotifierClientError`] on transport or server failure.
    async fn schedule(
        &self,
        request: &NotificationRequest,
    ) -> Result<Notification, NotifierClientError>;

    /// Cancel a notification (`DELETE /notify/{id}`). Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`NotifierClientError`] on transport or server failure.
    async fn cancel(&self, id: &str) -> Result<(), NotifierClientError>;
}
