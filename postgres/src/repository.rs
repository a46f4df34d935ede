use crate::database_error;
use async_trait::async_trait;
use delayline_core::booking::{Booking, BookingStatus, Event};
use delayline_core::repository::{BookingRepository, RepositoryError};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};

/// [`BookingRepository`] bound to one open transaction.
pub struct PgBookingRepository {
    tx: Transaction<'static, Postgres>,
}

impl PgBookingRepository {
    /// Bind to an open transaction.
    #[must_use]
    pub const fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self { tx }
    }

    /// Give the transaction back for commit or rollback.
    #[must_use]
    pub fn into_inner(self) -> Transaction<'static, Postgres> {
        self.tx
    }
}

impl std::fmt::Debug for PgBookingRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgBookingRepository").finish_non_exhaustive()
    }
}

fn event_from_row(row: &PgRow) -> Result<Event, sqlx::Error> {
    Ok(Event {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        capacity: row.try_get("capacity")?,
        available: row.try_get("available")?,
        date: row.try_get("date")?,
        payment_ttl_secs: row.try_get("payment_ttl_secs")?,
    })
}

fn booking_from_row(row: &PgRow) -> Result<Booking, RepositoryError> {
    let decode = |e: sqlx::Error| database_error("decode booking", &e);

    let id: String = row.try_get("id").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let status = BookingStatus::parse(&status).ok_or_else(|| {
        RepositoryError::CorruptState(format!("booking {id} has unknown status {status:?}"))
    })?;

    Ok(Booking {
        event_id: row.try_get("event_id").map_err(decode)?,
        user_id: row.try_get("user_id").map_err(decode)?,
        status,
        payment_deadline: row.try_get("payment_deadline").map_err(decode)?,
        decremented: row.try_get("decremented").map_err(decode)?,
        notification_id: row.try_get("notification_id").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
        id,
    })
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn create_event(&mut self, event: &Event) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO events (id, name, capacity, available, date, payment_ttl_secs)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(&event.id)
        .bind(&event.name)
        .bind(event.capacity)
        .bind(event.available)
        .bind(event.date)
        .bind(event.payment_ttl_secs)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| database_error("insert event", &e))?;

        tracing::debug!(event_id = %event.id, capacity = event.capacity, "Inserted event");
        Ok(())
    }

    async fn get_event(&mut self, id: &str) -> Result<Option<Event>, RepositoryError> {
        let row = sqlx::query(
            r"
            SELECT id, name, capacity, available, date, payment_ttl_secs
            FROM events
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| database_error("select event", &e))?;

        row.as_ref()
            .map(event_from_row)
            .transpose()
            .map_err(|e| database_error("decode event", &e))
    }

    async fn update_event_available(
        &mut self,
        id: &str,
        available: i64,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE events SET available = $2 WHERE id = $1")
            .bind(id)
            .bind(available)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| database_error("update event", &e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound {
                entity: "event",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO bookings
                (id, event_id, user_id, status, payment_deadline, decremented,
                 notification_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(&booking.id)
        .bind(&booking.event_id)
        .bind(&booking.user_id)
        .bind(booking.status.as_str())
        .bind(booking.payment_deadline)
        .bind(booking.decremented)
        .bind(booking.notification_id.as_deref())
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| database_error("insert booking", &e))?;

        tracing::debug!(
            booking_id = %booking.id,
            event_id = %booking.event_id,
            "Inserted booking"
        );
        Ok(())
    }

    async fn get_booking(&mut self, id: &str) -> Result<Option<Booking>, RepositoryError> {
        let row = sqlx::query(
            r"
            SELECT id, event_id, user_id, status, payment_deadline, decremented,
                   notification_id, created_at, updated_at
            FROM bookings
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| database_error("select booking", &e))?;

        row.as_ref().map(booking_from_row).transpose()
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE bookings
            SET status = $2, decremented = $3, notification_id = $4, updated_at = $5
            WHERE id = $1
            ",
        )
        .bind(&booking.id)
        .bind(booking.status.as_str())
        .bind(booking.decremented)
        .bind(booking.notification_id.as_deref())
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| database_error("update booking", &e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound {
                entity: "booking",
                id: booking.id.clone(),
            });
        }
        Ok(())
    }
}
