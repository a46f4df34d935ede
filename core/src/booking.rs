//! Events, bookings and the cancellation message template.
//!
//! A booking holds at most one unit of its event's capacity. Whether it does
//! is tracked by `decremented`, which is only ever flipped in the same
//! transaction that moves `Event::available`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Status of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    /// Awaiting payment.
    Pending,
    /// Paid.
    Confirmed,
    /// Cancelled by the user or by the payment timer.
    Cancelled,
    /// Payment window elapsed.
    Expired,
}

impl BookingStatus {
    /// Storage representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Parse a status from its storage representation.
    ///
    /// Returns `None` for unknown values; callers treat that as a broken
    /// invariant rather than a user error.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bookable event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Total seats.
    pub capacity: i64,
    /// Seats not held by any booking.
    pub available: i64,
    /// When the event takes place.
    pub date: DateTime<Utc>,
    /// Payment window granted to each booking, in seconds.
    #[serde(rename = "payment_ttl")]
    pub payment_ttl_secs: i64,
}

impl Event {
    /// Payment window as a duration.
    #[must_use]
    pub fn payment_ttl(&self) -> Duration {
        Duration::seconds(self.payment_ttl_secs)
    }
}

/// A user's reservation against an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking id.
    pub id: String,
    /// Event the booking belongs to.
    pub event_id: String,
    /// User (and Telegram recipient) who booked.
    pub user_id: String,
    /// Current status.
    pub status: BookingStatus,
    /// Deadline for confirming.
    pub payment_deadline: DateTime<Utc>,
    /// Whether this booking currently holds one unit of `Event::available`.
    pub decremented: bool,
    /// Id of the scheduled cancellation notification, if armed.
    pub notification_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// A request to cancel a booking, decoded from a fired notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelBookingEvent {
    /// Booking to cancel.
    pub booking_id: String,
    /// Event the booking belongs to.
    pub event_id: String,
}

const TEMPLATE_PREFIX: &str = "Your booking ";
const TEMPLATE_INFIX: &str = " for event ";
const TEMPLATE_SUFFIX: &str = " has been canceled due to not paying in time. \nPlease contact support if you believe this is an error.";

/// Message text that cannot be read back as a cancellation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("message does not match the cancellation template: {0}")]
pub struct TemplateError(pub String);

/// Render the payment-expired message for a booking.
#[must_use]
pub fn cancellation_message(booking_id: &str, event_id: &str) -> String {
    format!("{TEMPLATE_PREFIX}{booking_id}{TEMPLATE_INFIX}{event_id}{TEMPLATE_SUFFIX}")
}

/// Recover booking and event ids from a payment-expired message.
///
/// Both slots must be non-empty and free of whitespace.
///
/// # Errors
///
/// Returns [`TemplateError`] if the text was not produced by
/// [`cancellation_message`].
pub fn parse_cancellation_message(message: &str) -> Result<CancelBookingEvent, TemplateError> {
    let body = message
        .strip_prefix(TEMPLATE_PREFIX)
        .and_then(|rest| rest.strip_suffix(TEMPLATE_SUFFIX))
        .ok_or_else(|| TemplateError("unexpected prefix or suffix".to_string()))?;

    let (booking_id, event_id) = body
        .split_once(TEMPLATE_INFIX)
        .ok_or_else(|| TemplateError("missing event slot".to_string()))?;

    for (slot, value) in [("booking id", booking_id), ("event id", event_id)] {
        if value.is_empty() || value.chars().any(char::is_whitespace) {
            return Err(TemplateError(format!("invalid {slot} {value:?}")));
        }
    }

    Ok(CancelBookingEvent {
        booking_id: booking_id.to_string(),
        event_id: event_id.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn message_matches_published_template() {
        assert_eq!(
            cancellation_message("b-1", "e-1"),
            "Your booking b-1 for event e-1 has been canceled due to not paying in time. \nPlease contact support if you believe this is an error."
        );
    }

    #[test]
    fn parse_extracts_both_slots() {
        let event = parse_cancellation_message(&cancellation_message("b-1", "e-1")).unwrap();
        assert_eq!(event.booking_id, "b-1");
        assert_eq!(event.event_id, "e-1");
    }

    #[test]
    fn parse_rejects_foreign_text() {
        assert!(parse_cancellation_message("hi").is_err());
        assert!(parse_cancellation_message("Your booking  for event e has been canceled due to not paying in time. \nPlease contact support if you believe this is an error.").is_err());
        assert!(parse_cancellation_message("Your booking b has been canceled due to not paying in time. \nPlease contact support if you believe this is an error.").is_err());
    }

    #[test]
    fn status_parse_rejects_unknown_values() {
        assert_eq!(BookingStatus::parse("pending"), Some(BookingStatus::Pending));
        assert_eq!(BookingStatus::parse("expired"), Some(BookingStatus::Expired));
        assert_eq!(BookingStatus::parse("refunded"), None);
    }

    #[test]
    fn event_serializes_ttl_in_seconds() {
        let event = Event {
            id: "e".to_string(),
            name: "concert".to_string(),
            capacity: 10,
            available: 10,
            date: DateTime::<Utc>::UNIX_EPOCH,
            payment_ttl_secs: 900,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["payment_ttl"], 900);
        assert_eq!(event.payment_ttl(), Duration::minutes(15));
    }

    proptest! {
        #[test]
        fn uuid_like_ids_survive_the_template(
            booking in "[a-f0-9-]{1,36}",
            event in "[a-f0-9-]{1,36}",
        ) {
            let parsed = parse_cancellation_message(&cancellation_message(&booking, &event)).unwrap();
            prop_assert_eq!(parsed.booking_id, booking);
            prop_assert_eq!(parsed.event_id, event);
        }
    }
}
