//! Durable object store and scheduling index ports.
//!
//! The object store holds whole notification records by id. The scheduling
//! index is two sorted sets of ids ("due", "retry") scored by epoch seconds.
//!
//! Popping from the index is range-by-score followed by a best-effort remove,
//! so an id may surface more than once. Consumers of [`SchedulingIndex::pop_due`]
//! must re-check the record status before acting on it.

use crate::notification::{Notification, ScheduleSet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors from the object store or scheduling index.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend could not be reached or rejected the command.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A stored record could not be encoded or decoded.
    #[error("Record serialization failed: {0}")]
    Serialization(String),
}

/// Whole-record storage for notifications.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert or replace a record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    async fn save(&self, notification: &Notification) -> Result<(), StoreError>;

    /// Load a record by id. `Ok(None)` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails or the record is corrupt.
    async fn get(&self, id: &str) -> Result<Option<Notification>, StoreError>;
}

/// Time-ordered index over notification ids.
#[async_trait]
pub trait SchedulingIndex: Send + Sync {
    /// Add (or re-score) `id` in `set` at `at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    async fn schedule(&self, set: ScheduleSet, id: &str, at: DateTime<Utc>)
    -> Result<(), StoreError>;

    /// Fetch up to `limit` ids from `set` scored at or before `now`, lowest
    /// score first, and remove them from the set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the range query fails. A failed removal is
    /// logged by the implementation and does not fail the call.
    async fn pop_due(
        &self,
        set: ScheduleSet,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;

    /// Persist `notification` and remove its id from both sets in one atomic
    /// step. Used for cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the transaction fails; nothing is applied in
    /// that case.
    async fn save_and_unschedule(&self, notification: &Notification) -> Result<(), StoreError>;
}
