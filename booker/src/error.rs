//! Booking errors.
//!
//! Every use case returns [`BookingError`]. Domain variants describe why a
//! request was refused; [`BookingError::Repository`] carries store failures.
//! A [`RepositoryError::CorruptState`] means a stored row violates the state
//! machine and is handled by [`BookingError::abort_if_corrupt`] at the
//! driver boundary.

use delayline_core::booking::BookingStatus;
use delayline_core::repository::RepositoryError;
use thiserror::Error;

/// Why a booking operation did not happen.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Malformed input; names the field.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Request field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// No event with this id.
    #[error("event {0} not found")]
    EventNotFound(String),

    /// No booking with this id.
    #[error("booking {0} not found")]
    BookingNotFound(String),

    /// The booking exists but under another event.
    #[error("booking {booking_id} does not belong to event {event_id}")]
    EventMismatch {
        /// Booking from the request.
        booking_id: String,
        /// Event from the request path.
        event_id: String,
    },

    /// Booking on an event that has already taken place.
    #[error("event {0} has already taken place")]
    EventPassed(String),

    /// No capacity left.
    #[error("event {0} is sold out")]
    SoldOut(String),

    /// The booking was already cancelled.
    #[error("booking {0} is already cancelled")]
    AlreadyCancelled(String),

    /// The booking is in a terminal state other than Cancelled.
    #[error("booking {id} is {status}")]
    InvalidStatus {
        /// Booking id.
        id: String,
        /// Its current status.
        status: BookingStatus,
    },

    /// Confirmation after `payment_deadline`.
    #[error("payment deadline for booking {0} has passed")]
    DeadlinePassed(String),

    /// Store failure.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl BookingError {
    /// Error for a status that does not allow the operation.
    pub(crate) fn from_status(id: &str, status: BookingStatus) -> Self {
        match status {
            BookingStatus::Cancelled => Self::AlreadyCancelled(id.to_string()),
            status => Self::InvalidStatus {
                id: id.to_string(),
                status,
            },
        }
    }

    /// Whether retrying the same request could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Repository(RepositoryError::Database(_)))
    }

    /// Whether the store holds a row that violates the state machine.
    #[must_use]
    pub const fn is_corrupt(&self) -> bool {
        matches!(self, Self::Repository(RepositoryError::CorruptState(_)))
    }

    /// Abort the process on corrupt stored state.
    ///
    /// Drivers call this before mapping an error to a response or a
    /// settlement.
    pub fn abort_if_corrupt(&self) {
        if self.is_corrupt() {
            tracing::error!(error = %self, "Corrupt booking state, aborting");
            std::process::abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors() {
        assert_eq!(
            BookingError::from_status("b1", BookingStatus::Cancelled),
            BookingError::AlreadyCancelled("b1".to_string())
        );
        assert_eq!(
            BookingError::from_status("b1", BookingStatus::Expired).to_string(),
            "booking b1 is expired"
        );
    }

    #[test]
    fn only_database_errors_are_transient() {
        assert!(BookingError::from(RepositoryError::Database("timeout".to_string())).is_transient());
        assert!(!BookingError::from(RepositoryError::NotFound {
            entity: "booking",
            id: "b1".to_string(),
        })
        .is_transient());
        assert!(!BookingError::SoldOut("e1".to_string()).is_transient());
    }

    #[test]
    fn corrupt_state_is_detected() {
        let err = BookingError::from(RepositoryError::CorruptState("status 'paid'".to_string()));
        assert!(err.is_corrupt());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("status 'paid'"));
    }
}
