//! Booking use cases.
//!
//! Each operation runs as one unit of work handed to a
//! [`TransactionManager`]. Capacity moves only together with a booking's
//! `decremented` flag, in the same transaction:
//!
//! - **book** inserts a Pending booking and arms a cancellation notification
//!   due at the payment deadline. Only when the notifier accepted it does the
//!   booking take a seat.
//! - **confirm** takes the seat if book could not, marks the booking
//!   Confirmed and, after commit, disarms the notification.
//! - **cancel** gives the seat back if the booking holds one. It runs for an
//!   explicit user cancel and for every fired notification, so a repeated
//!   cancel reports [`BookingError::AlreadyCancelled`] and changes nothing.

use crate::error::BookingError;
use chrono::{DateTime, Utc};
use delayline_core::booking::{Booking, BookingStatus, Event, cancellation_message};
use delayline_core::channel::{TELEGRAM, validate_recipient};
use delayline_core::environment::Clock;
use delayline_core::notification::NotificationRequest;
use delayline_core::notifier_client::NotifierClient;
use delayline_core::repository::{BookingRepository, TransactionManager};
use delayline_runtime::metrics::BookingMetrics;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest accepted event name, in characters.
pub const MAX_EVENT_NAME_LEN: usize = 255;

/// Body of `POST /events`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewEvent {
    /// Display name.
    pub name: String,
    /// Total seats.
    pub capacity: i64,
    /// When the event takes place; must be in the future.
    pub date: DateTime<Utc>,
    /// Payment window per booking, in seconds.
    pub payment_ttl: i64,
}

/// Booking operations over a transactional store and the notifier.
#[derive(Clone)]
pub struct BookingService<M> {
    transactions: M,
    notifier: Arc<dyn NotifierClient>,
    clock: Arc<dyn Clock>,
}

impl<M: TransactionManager> BookingService<M> {
    /// Create the service.
    pub fn new(transactions: M, notifier: Arc<dyn NotifierClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            transactions,
            notifier,
            clock,
        }
    }

    /// Create an event with all seats available.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] for an empty or overlong name, a
    /// capacity below one, a date not in the future or a non-positive
    /// payment window; [`BookingError::Repository`] on store failure.
    pub async fn create_event(&self, new_event: NewEvent) -> Result<Event, BookingError> {
        let result = self.create_event_inner(new_event).await;
        record("create_event", &result);
        result
    }

    async fn create_event_inner(&self, new_event: NewEvent) -> Result<Event, BookingError> {
        let now = self.clock.now();
        let name = new_event.name.trim();
        if name.is_empty() {
            return Err(invalid("name", "must not be empty"));
        }
        if name.chars().count() > MAX_EVENT_NAME_LEN {
            return Err(invalid(
                "name",
                format!("must be at most {MAX_EVENT_NAME_LEN} characters"),
            ));
        }
        if new_event.capacity < 1 {
            return Err(invalid("capacity", "must be at least 1"));
        }
        if new_event.date <= now {
            return Err(invalid("date", "must be in the future"));
        }
        if new_event.payment_ttl <= 0 {
            return Err(invalid("payment_ttl", "must be a positive number of seconds"));
        }

        let event = Event {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            capacity: new_event.capacity,
            available: new_event.capacity,
            date: new_event.date,
            payment_ttl_secs: new_event.payment_ttl,
        };

        let created = self
            .transactions
            .transaction(move |tx| {
                Box::pin(async move {
                    tx.create_event(&event).await?;
                    Ok::<_, BookingError>(event)
                })
            })
            .await?;

        info!(event_id = %created.id, capacity = created.capacity, "Event created");
        Ok(created)
    }

    /// Load an event.
    ///
    /// # Errors
    ///
    /// [`BookingError::EventNotFound`] or [`BookingError::Repository`].
    pub async fn get_event(&self, event_id: &str) -> Result<Event, BookingError> {
        let event_id = event_id.to_string();
        self.transactions
            .transaction(move |tx| Box::pin(async move { load_event(tx, &event_id).await }))
            .await
    }

    /// Create a Pending booking and arm its payment deadline.
    ///
    /// A notifier failure does not fail the booking: it is kept without a
    /// seat and without a notification, and confirm takes the seat later.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] if `user_id` is not a Telegram chat id,
    /// [`BookingError::EventNotFound`], [`BookingError::EventPassed`],
    /// [`BookingError::SoldOut`] or [`BookingError::Repository`].
    pub async fn book(&self, event_id: &str, user_id: &str) -> Result<Booking, BookingError> {
        let result = self.book_inner(event_id, user_id).await;
        record("book", &result);
        result
    }

    async fn book_inner(&self, event_id: &str, user_id: &str) -> Result<Booking, BookingError> {
        validate_recipient(TELEGRAM, user_id).map_err(|e| invalid("user_id", e.to_string()))?;

        let now = self.clock.now();
        let notifier = Arc::clone(&self.notifier);
        let event_id = event_id.to_string();
        let user_id = user_id.to_string();

        let booking = self
            .transactions
            .transaction(move |tx| {
                Box::pin(async move {
                    let mut event = load_event(tx, &event_id).await?;
                    if event.date < now {
                        return Err(BookingError::EventPassed(event.id));
                    }
                    if event.available <= 0 {
                        return Err(BookingError::SoldOut(event.id));
                    }

                    let payment_deadline = now
                        .checked_add_signed(event.payment_ttl())
                        .ok_or_else(|| invalid("payment_ttl", "deadline is out of range"))?;

                    let mut booking = Booking {
                        id: Uuid::new_v4().to_string(),
                        event_id: event.id.clone(),
                        user_id,
                        status: BookingStatus::Pending,
                        payment_deadline,
                        decremented: false,
                        notification_id: None,
                        created_at: now,
                        updated_at: now,
                    };
                    tx.insert_booking(&booking).await?;

                    let request = NotificationRequest {
                        send_at: Some(payment_deadline),
                        channel: TELEGRAM.to_string(),
                        recipient: booking.user_id.clone(),
                        message: cancellation_message(&booking.id, &event.id),
                    };
                    match notifier.schedule(&request).await {
                        Ok(notification) => {
                            booking.notification_id = Some(notification.id);
                            booking.decremented = true;
                            tx.update_booking(&booking).await?;

                            event.available -= 1;
                            tx.update_event_available(&event.id, event.available)
                                .await?;
                        }
                        Err(e) => {
                            warn!(
                                booking_id = %booking.id,
                                event_id = %event.id,
                                error = %e,
                                "Failed to arm payment deadline, booking holds no seat until confirmed"
                            );
                        }
                    }

                    Ok(booking)
                })
            })
            .await?;

        info!(
            booking_id = %booking.id,
            event_id = %booking.event_id,
            payment_deadline = %booking.payment_deadline,
            armed = booking.notification_id.is_some(),
            "Booking created"
        );
        Ok(booking)
    }

    /// Confirm a Pending booking before its payment deadline.
    ///
    /// After commit the cancellation notification is deleted; a failure
    /// there is logged and ignored.
    ///
    /// # Errors
    ///
    /// [`BookingError::BookingNotFound`], [`BookingError::EventMismatch`],
    /// a status error for non-Pending bookings,
    /// [`BookingError::DeadlinePassed`], [`BookingError::SoldOut`] when a
    /// seat is still needed and none is left, or
    /// [`BookingError::Repository`].
    pub async fn confirm(&self, event_id: &str, booking_id: &str) -> Result<Booking, BookingError> {
        let result = self.confirm_inner(event_id, booking_id).await;
        record("confirm", &result);
        result
    }

    async fn confirm_inner(&self, event_id: &str, booking_id: &str) -> Result<Booking, BookingError> {
        let now = self.clock.now();
        let event_id = event_id.to_string();
        let booking_id = booking_id.to_string();

        let booking = self
            .transactions
            .transaction(move |tx| {
                Box::pin(async move {
                    let mut booking = load_booking(tx, &booking_id, Some(&event_id)).await?;
                    if booking.status != BookingStatus::Pending {
                        return Err(BookingError::from_status(&booking.id, booking.status));
                    }
                    if booking.payment_deadline <= now {
                        return Err(BookingError::DeadlinePassed(booking.id));
                    }

                    if !booking.decremented {
                        let event = load_event(tx, &booking.event_id).await?;
                        if event.available <= 0 {
                            return Err(BookingError::SoldOut(event.id));
                        }
                        tx.update_event_available(&event.id, event.available - 1)
                            .await?;
                        booking.decremented = true;
                    }

                    booking.status = BookingStatus::Confirmed;
                    booking.updated_at = now;
                    tx.update_booking(&booking).await?;
                    Ok(booking)
                })
            })
            .await?;

        info!(booking_id = %booking.id, event_id = %booking.event_id, "Booking confirmed");
        if let Some(notification_id) = &booking.notification_id {
            self.disarm(&booking.id, notification_id).await;
        }
        Ok(booking)
    }

    /// Cancel a booking and release its seat.
    ///
    /// When `event_id` is given the booking must belong to it. This is the
    /// transaction run for fired payment deadlines; it leaves the notifier
    /// alone.
    ///
    /// # Errors
    ///
    /// [`BookingError::BookingNotFound`], [`BookingError::EventMismatch`],
    /// [`BookingError::AlreadyCancelled`], a status error for Confirmed or
    /// Expired bookings, or [`BookingError::Repository`].
    pub async fn cancel(
        &self,
        booking_id: &str,
        event_id: Option<&str>,
    ) -> Result<Booking, BookingError> {
        let result = self.cancel_inner(booking_id, event_id).await;
        record("cancel", &result);
        result
    }

    async fn cancel_inner(
        &self,
        booking_id: &str,
        event_id: Option<&str>,
    ) -> Result<Booking, BookingError> {
        let now = self.clock.now();
        let booking_id = booking_id.to_string();
        let event_id = event_id.map(str::to_string);

        let booking = self
            .transactions
            .transaction(move |tx| {
                Box::pin(async move {
                    let mut booking = load_booking(tx, &booking_id, event_id.as_deref()).await?;
                    if booking.status != BookingStatus::Pending {
                        return Err(BookingError::from_status(&booking.id, booking.status));
                    }

                    if booking.decremented {
                        let event = load_event(tx, &booking.event_id).await?;
                        tx.update_event_available(&event.id, event.available + 1)
                            .await?;
                        booking.decremented = false;
                    }

                    booking.status = BookingStatus::Cancelled;
                    booking.updated_at = now;
                    tx.update_booking(&booking).await?;
                    Ok(booking)
                })
            })
            .await?;

        info!(booking_id = %booking.id, event_id = %booking.event_id, "Booking cancelled");
        Ok(booking)
    }

    /// Cancel on the user's request: [`BookingService::cancel`] scoped to
    /// `event_id`, then delete the pending notification so the payment
    /// deadline message is never sent.
    ///
    /// # Errors
    ///
    /// As [`BookingService::cancel`].
    pub async fn cancel_by_user(
        &self,
        event_id: &str,
        booking_id: &str,
    ) -> Result<Booking, BookingError> {
        let booking = self.cancel(booking_id, Some(event_id)).await?;
        if let Some(notification_id) = &booking.notification_id {
            self.disarm(&booking.id, notification_id).await;
        }
        Ok(booking)
    }

    async fn disarm(&self, booking_id: &str, notification_id: &str) {
        match self.notifier.cancel(notification_id).await {
            Ok(()) => debug!(booking_id, notification_id, "Payment deadline disarmed"),
            Err(e) => warn!(
                booking_id,
                notification_id,
                error = %e,
                "Failed to disarm payment deadline, the fired cancellation will be ignored"
            ),
        }
    }
}

async fn load_event(tx: &mut dyn BookingRepository, event_id: &str) -> Result<Event, BookingError> {
    tx.get_event(event_id)
        .await?
        .ok_or_else(|| BookingError::EventNotFound(event_id.to_string()))
}

async fn load_booking(
    tx: &mut dyn BookingRepository,
    booking_id: &str,
    event_id: Option<&str>,
) -> Result<Booking, BookingError> {
    let booking = tx
        .get_booking(booking_id)
        .await?
        .ok_or_else(|| BookingError::BookingNotFound(booking_id.to_string()))?;

    match event_id {
        Some(event_id) if booking.event_id != event_id => Err(BookingError::EventMismatch {
            booking_id: booking.id,
            event_id: event_id.to_string(),
        }),
        _ => Ok(booking),
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> BookingError {
    BookingError::Validation {
        field,
        reason: reason.into(),
    }
}

fn record<T>(operation: &'static str, result: &Result<T, BookingError>) {
    let label = match result {
        Ok(_) => "ok",
        Err(e) if e.is_transient() || e.is_corrupt() => "error",
        Err(_) => "rejected",
    };
    BookingMetrics::record_operation(operation, label);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use delayline_core::booking::parse_cancellation_message;
    use delayline_core::repository::RepositoryError;
    use delayline_testing::{FixedClock, InMemoryTransactionManager, MockNotifierClient, test_clock};

    const USER: &str = "123456789";

    struct Fixture {
        store: InMemoryTransactionManager,
        notifier: MockNotifierClient,
        clock: FixedClock,
        service: BookingService<InMemoryTransactionManager>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = InMemoryTransactionManager::new();
            let notifier = MockNotifierClient::new();
            let clock = test_clock();
            let service = BookingService::new(
                store.clone(),
                Arc::new(notifier.clone()),
                Arc::new(clock.clone()),
            );
            Self {
                store,
                notifier,
                clock,
                service,
            }
        }

        async fn event(&self, capacity: i64) -> Event {
            self.service
                .create_event(NewEvent {
                    name: "Concert".to_string(),
                    capacity,
                    date: self.clock.now() + Duration::days(7),
                    payment_ttl: 600,
                })
                .await
                .unwrap()
        }

        async fn available(&self, event_id: &str) -> i64 {
            self.store.event(event_id).await.unwrap().available
        }
    }

    #[tokio::test]
    async fn create_event_starts_with_full_capacity() {
        let f = Fixture::new();
        let event = f.event(3).await;

        assert_eq!(event.available, 3);
        assert_eq!(f.store.event(&event.id).await.unwrap(), event);
        assert_eq!(f.service.get_event(&event.id).await.unwrap(), event);
    }

    #[tokio::test]
    async fn create_event_validates_each_field() {
        let f = Fixture::new();
        let valid = NewEvent {
            name: "Concert".to_string(),
            capacity: 1,
            date: f.clock.now() + Duration::hours(1),
            payment_ttl: 60,
        };

        let cases = [
            ("name", NewEvent { name: "  ".to_string(), ..valid.clone() }),
            ("name", NewEvent { name: "x".repeat(256), ..valid.clone() }),
            ("capacity", NewEvent { capacity: 0, ..valid.clone() }),
            ("date", NewEvent { date: f.clock.now(), ..valid.clone() }),
            ("payment_ttl", NewEvent { payment_ttl: 0, ..valid.clone() }),
        ];
        for (expected, new_event) in cases {
            let err = f.service.create_event(new_event).await.unwrap_err();
            assert!(
                matches!(err, BookingError::Validation { field, .. } if field == expected),
                "{expected}: {err:?}"
            );
        }
        assert_eq!(f.store.commit_count(), 0);
    }

    #[tokio::test]
    async fn get_unknown_event() {
        let f = Fixture::new();
        assert_eq!(
            f.service.get_event("nope").await.unwrap_err(),
            BookingError::EventNotFound("nope".to_string())
        );
    }

    #[tokio::test]
    async fn book_arms_deadline_and_takes_a_seat() {
        let f = Fixture::new();
        let event = f.event(2).await;

        let booking = f.service.book(&event.id, USER).await.unwrap();

        assert_eq!(booking.status, BookingStatus::Pending);
        assert!(booking.decremented);
        assert_eq!(booking.notification_id.as_deref(), Some("notif-1"));
        assert_eq!(booking.payment_deadline, f.clock.now() + Duration::seconds(600));
        assert_eq!(f.available(&event.id).await, 1);

        let scheduled = f.notifier.scheduled();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].send_at, Some(booking.payment_deadline));
        assert_eq!(scheduled[0].channel, "telegram");
        assert_eq!(scheduled[0].recipient, USER);
        let parsed = parse_cancellation_message(&scheduled[0].message).unwrap();
        assert_eq!(parsed.booking_id, booking.id);
        assert_eq!(parsed.event_id, event.id);
    }

    #[tokio::test]
    async fn book_without_notifier_keeps_the_seat_free() {
        let f = Fixture::new();
        let event = f.event(1).await;
        f.notifier.set_schedule_failing(true);

        let booking = f.service.book(&event.id, USER).await.unwrap();

        assert!(!booking.decremented);
        assert!(booking.notification_id.is_none());
        assert_eq!(f.available(&event.id).await, 1);
        assert_eq!(f.store.booking(&booking.id).await.unwrap(), booking);
    }

    #[tokio::test]
    async fn book_rejects_sold_out_past_and_unknown_events() {
        let f = Fixture::new();
        let event = f.event(1).await;
        f.service.book(&event.id, USER).await.unwrap();

        assert_eq!(
            f.service.book(&event.id, USER).await.unwrap_err(),
            BookingError::SoldOut(event.id.clone())
        );
        assert_eq!(
            f.service.book("missing", USER).await.unwrap_err(),
            BookingError::EventNotFound("missing".to_string())
        );

        f.clock.advance(Duration::days(8));
        let other = f.event(1).await;
        f.clock.advance(Duration::days(8));
        assert_eq!(
            f.service.book(&other.id, USER).await.unwrap_err(),
            BookingError::EventPassed(other.id.clone())
        );
        assert_eq!(f.notifier.scheduled().len(), 1);
    }

    #[tokio::test]
    async fn book_rejects_malformed_user_id() {
        let f = Fixture::new();
        let event = f.event(1).await;

        let err = f.service.book(&event.id, "alice").await.unwrap_err();

        assert!(matches!(err, BookingError::Validation { field: "user_id", .. }));
        assert!(f.notifier.scheduled().is_empty());
    }

    #[tokio::test]
    async fn failed_commit_after_book_leaves_nothing_behind() {
        let f = Fixture::new();
        let event = f.event(1).await;
        f.store.fail_next_commits(1);

        let err = f.service.book(&event.id, USER).await.unwrap_err();

        assert!(err.is_transient());
        assert!(f.store.bookings().await.is_empty());
        assert_eq!(f.available(&event.id).await, 1);
    }

    #[tokio::test]
    async fn confirm_disarms_the_deadline() {
        let f = Fixture::new();
        let event = f.event(2).await;
        let booking = f.service.book(&event.id, USER).await.unwrap();

        let confirmed = f.service.confirm(&event.id, &booking.id).await.unwrap();

        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert!(confirmed.decremented);
        assert_eq!(f.available(&event.id).await, 1);
        assert_eq!(f.notifier.cancelled(), vec!["notif-1".to_string()]);
    }

    #[tokio::test]
    async fn confirm_takes_the_seat_book_could_not() {
        let f = Fixture::new();
        let event = f.event(1).await;
        f.notifier.set_schedule_failing(true);
        let booking = f.service.book(&event.id, USER).await.unwrap();

        let confirmed = f.service.confirm(&event.id, &booking.id).await.unwrap();

        assert!(confirmed.decremented);
        assert_eq!(f.available(&event.id).await, 0);
        assert!(f.notifier.cancelled().is_empty());
    }

    #[tokio::test]
    async fn confirm_without_seat_on_full_event_is_sold_out() {
        let f = Fixture::new();
        let event = f.event(1).await;
        f.notifier.set_schedule_failing(true);
        let unarmed = f.service.book(&event.id, USER).await.unwrap();
        f.notifier.set_schedule_failing(false);
        f.service.book(&event.id, "987654321").await.unwrap();

        assert_eq!(
            f.service.confirm(&event.id, &unarmed.id).await.unwrap_err(),
            BookingError::SoldOut(event.id.clone())
        );
        assert_eq!(
            f.store.booking(&unarmed.id).await.unwrap().status,
            BookingStatus::Pending
        );
    }

    #[tokio::test]
    async fn confirm_after_deadline_is_refused() {
        let f = Fixture::new();
        let event = f.event(1).await;
        let booking = f.service.book(&event.id, USER).await.unwrap();
        f.clock.advance(Duration::seconds(600));

        assert_eq!(
            f.service.confirm(&event.id, &booking.id).await.unwrap_err(),
            BookingError::DeadlinePassed(booking.id.clone())
        );
        assert_eq!(
            f.store.booking(&booking.id).await.unwrap().status,
            BookingStatus::Pending
        );
    }

    #[tokio::test]
    async fn confirm_checks_event_and_status() {
        let f = Fixture::new();
        let event = f.event(2).await;
        let booking = f.service.book(&event.id, USER).await.unwrap();

        assert!(matches!(
            f.service.confirm("other", &booking.id).await.unwrap_err(),
            BookingError::EventMismatch { .. }
        ));
        assert_eq!(
            f.service.confirm(&event.id, "missing").await.unwrap_err(),
            BookingError::BookingNotFound("missing".to_string())
        );

        f.service.confirm(&event.id, &booking.id).await.unwrap();
        assert_eq!(
            f.service.confirm(&event.id, &booking.id).await.unwrap_err(),
            BookingError::InvalidStatus {
                id: booking.id.clone(),
                status: BookingStatus::Confirmed,
            }
        );
    }

    #[tokio::test]
    async fn confirm_survives_notifier_cancel_failure() {
        let f = Fixture::new();
        let event = f.event(1).await;
        let booking = f.service.book(&event.id, USER).await.unwrap();
        f.notifier.set_cancel_failing(true);

        let confirmed = f.service.confirm(&event.id, &booking.id).await.unwrap();

        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert_eq!(f.notifier.cancelled().len(), 1);
    }

    #[tokio::test]
    async fn cancel_releases_the_seat_once() {
        let f = Fixture::new();
        let event = f.event(1).await;
        let booking = f.service.book(&event.id, USER).await.unwrap();
        assert_eq!(f.available(&event.id).await, 0);

        let cancelled = f.service.cancel(&booking.id, Some(&event.id)).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert!(!cancelled.decremented);
        assert_eq!(f.available(&event.id).await, 1);

        assert_eq!(
            f.service.cancel(&booking.id, Some(&event.id)).await.unwrap_err(),
            BookingError::AlreadyCancelled(booking.id.clone())
        );
        assert_eq!(f.available(&event.id).await, 1);
        assert!(f.notifier.cancelled().is_empty());
    }

    #[tokio::test]
    async fn cancel_of_unarmed_booking_leaves_capacity_alone() {
        let f = Fixture::new();
        let event = f.event(2).await;
        f.notifier.set_schedule_failing(true);
        let booking = f.service.book(&event.id, USER).await.unwrap();

        f.service.cancel(&booking.id, None).await.unwrap();

        assert_eq!(f.available(&event.id).await, 2);
    }

    #[tokio::test]
    async fn confirmed_booking_cannot_be_cancelled() {
        let f = Fixture::new();
        let event = f.event(1).await;
        let booking = f.service.book(&event.id, USER).await.unwrap();
        f.service.confirm(&event.id, &booking.id).await.unwrap();

        assert_eq!(
            f.service.cancel(&booking.id, None).await.unwrap_err(),
            BookingError::InvalidStatus {
                id: booking.id.clone(),
                status: BookingStatus::Confirmed,
            }
        );
        assert_eq!(f.available(&event.id).await, 0);
    }

    #[tokio::test]
    async fn user_cancel_disarms_the_deadline() {
        let f = Fixture::new();
        let event = f.event(1).await;
        let booking = f.service.book(&event.id, USER).await.unwrap();

        f.service.cancel_by_user(&event.id, &booking.id).await.unwrap();

        assert_eq!(f.notifier.cancelled(), vec!["notif-1".to_string()]);
        assert_eq!(f.available(&event.id).await, 1);
    }

    #[tokio::test]
    async fn corrupt_status_surfaces_as_corrupt_state() {
        let f = Fixture::new();
        let event = f.event(1).await;
        let booking = f.service.book(&event.id, USER).await.unwrap();
        f.store.corrupt_booking(&booking.id).await;

        let err = f.service.confirm(&event.id, &booking.id).await.unwrap_err();

        assert!(err.is_corrupt());
        assert!(matches!(
            err,
            BookingError::Repository(RepositoryError::CorruptState(_))
        ));
    }
}
