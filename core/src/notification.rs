//! Notification records and their lifecycle.
//!
//! A notification is created `Scheduled`, promoted to `Queued` by the
//! scheduler, and finished by the consumer (`Sent`, `Retrying`, `Failed`) or
//! by a cancellation (`Cancelled`):
//!
//! ```text
//! Scheduled ──▶ Queued ──▶ Sent
//!     │           │ ▲
//!     │           ▼ │
//!     │        Retrying ──▶ Failed
//!     │
//!     └──────(any non-terminal)──▶ Cancelled
//! ```
//!
//! Records are never deleted. Writers replace the whole record, so each
//! transition helper below only touches the fields its owner is allowed to
//! change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    /// Waiting in the "due" set for its send time.
    Scheduled,
    /// Published to the durable queue, not yet handled by a consumer.
    Queued,
    /// Delivered by the channel sender.
    Sent,
    /// Permanently failed; no further attempts.
    Failed,
    /// Last attempt failed; waiting in the "retry" set.
    Retrying,
    /// Cancelled before delivery.
    Cancelled,
}

impl NotificationStatus {
    /// Wire representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether no further transition may leave this status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two buckets of the scheduling index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleSet {
    /// First-time sends, scored by `send_at`.
    Due,
    /// Retries, scored by `next_attempt_at`.
    Retry,
}

impl ScheduleSet {
    /// Both sets, in the order the scheduler visits them.
    pub const ALL: [Self; 2] = [Self::Due, Self::Retry];

    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Due => "due",
            Self::Retry => "retry",
        }
    }
}

impl fmt::Display for ScheduleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score of an instant in the scheduling index (integer epoch seconds).
#[must_use]
pub fn epoch_score(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

/// A persisted intent to deliver `message` to `recipient` on `channel`.
///
/// The JSON form of this struct is both the HTTP representation and the
/// durable queue envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Opaque unique id.
    pub id: String,
    /// Channel tag, e.g. `telegram`.
    pub channel: String,
    /// Channel-specific address.
    pub recipient: String,
    /// Payload text.
    pub message: String,
    /// When the first attempt is due.
    pub send_at: DateTime<Utc>,
    /// Current status.
    pub status: NotificationStatus,
    /// Number of failed attempts so far.
    #[serde(default)]
    pub retry_count: u32,
    /// When the next retry is due; only set while retrying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Message of the last delivery error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Create a new record in `Scheduled`.
    #[must_use]
    pub fn scheduled(
        id: impl Into<String>,
        request: NotificationRequest,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            channel: request.channel,
            recipient: request.recipient,
            message: request.message,
            send_at: request.send_at.unwrap_or(now),
            status: NotificationStatus::Scheduled,
            retry_count: 0,
            next_attempt_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Scheduler transition: handed to the durable queue. Only a Retrying
    /// record carries `next_attempt_at`, so it is cleared here.
    pub fn mark_queued(&mut self, now: DateTime<Utc>) {
        self.status = NotificationStatus::Queued;
        self.next_attempt_at = None;
        self.updated_at = now;
    }

    /// Consumer transition: delivered.
    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.status = NotificationStatus::Sent;
        self.next_attempt_at = None;
        self.updated_at = now;
    }

    /// Consumer transition: failed, try again at `next_attempt_at`.
    pub fn mark_retrying(
        &mut self,
        error: impl Into<String>,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.status = NotificationStatus::Retrying;
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.into());
        self.next_attempt_at = Some(next_attempt_at);
        self.updated_at = now;
    }

    /// Consumer transition: failed for good.
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = NotificationStatus::Failed;
        self.last_error = Some(error.into());
        self.next_attempt_at = None;
        self.updated_at = now;
    }

    /// Cancellation transition.
    ///
    /// Returns `false` (and leaves the record untouched) when the record is
    /// already terminal.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = NotificationStatus::Cancelled;
        self.next_attempt_at = None;
        self.updated_at = now;
        true
    }

    /// Canonical JSON encoding used for the object store and queue envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a record from its JSON encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid notification.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Body of `POST /notify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    /// When to send; `None` means now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_at: Option<DateTime<Utc>>,
    /// Channel tag.
    #[serde(default)]
    pub channel: String,
    /// Channel-specific address.
    #[serde(default)]
    pub recipient: String,
    /// Payload text.
    #[serde(default)]
    pub message: String,
}
