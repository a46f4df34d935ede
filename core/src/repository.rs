//! Transactional booking store port.
//!
//! Use cases never see a connection. They hand a closure to a
//! [`TransactionManager`], receive a [`BookingRepository`] bound to one
//! transaction, and return `Ok` to commit or `Err` to roll back:
//!
//! ```rust,ignore
//! let booking = tx_manager
//!     .transaction(move |tx| {
//!         Box::pin(async move {
//!             let event = tx.get_event(&event_id).await?;
//!             // ...
//!             Ok::<_, BookingError>(booking)
//!         })
//!     })
//!     .await?;
//! ```

use crate::booking::{Booking, Event};
use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;

/// Errors from the relational store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Connection, query or commit failure.
    #[error("Database error: {0}")]
    Database(String),

    /// An update addressed a row that does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Table/entity name.
        entity: &'static str,
        /// Row id.
        id: String,
    },

    /// A stored value violates a domain invariant (e.g. unknown status).
    #[error("Corrupt stored state: {0}")]
    CorruptState(String),
}

/// Event and booking operations bound to one transaction.
#[async_trait]
pub trait BookingRepository: Send {
    /// Insert a new event.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] on database failure.
    async fn create_event(&mut self, event: &Event) -> Result<(), RepositoryError>;

    /// Load an event. `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] on database failure.
    async fn get_event(&mut self, id: &str) -> Result<Option<Event>, RepositoryError>;

    /// Overwrite an event's remaining capacity.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if the event does not exist.
    async fn update_event_available(
        &mut self,
        id: &str,
        available: i64,
    ) -> Result<(), RepositoryError>;

    /// Insert a new booking.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] on database failure.
    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), RepositoryError>;

    /// Load a booking. `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::CorruptState`] if the stored status is not
    /// a known value.
    async fn get_booking(&mut self, id: &str) -> Result<Option<Booking>, RepositoryError>;

    /// Overwrite a booking's mutable fields (status, `decremented`,
    /// `notification_id`, `updated_at`).
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if the booking does not exist.
    async fn update_booking(&mut self, booking: &Booking) -> Result<(), RepositoryError>;
}

/// Runs units of work inside a single READ COMMITTED transaction.
pub trait TransactionManager: Send + Sync {
    /// Run `work` in a transaction, committing on `Ok` and rolling back on
    /// `Err`. Failures to begin or commit are converted into `E`.
    fn transaction<'a, T, E, F>(&'a self, work: F) -> BoxFuture<'a, Result<T, E>>
    where
        T: Send + 'a,
        E: From<RepositoryError> + Send + 'a,
        F: for<'t> FnOnce(&'t mut dyn BookingRepository) -> BoxFuture<'t, Result<T, E>>
            + Send
            + 'a;
}
