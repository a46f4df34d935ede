//! PostgreSQL booking store for the booker.
//!
//! [`PgTransactionManager`] implements the transaction port from
//! `delayline-core`: every unit of work runs in its own READ COMMITTED
//! transaction, committed when the closure returns `Ok` and rolled back
//! otherwise. Event and booking rows read inside a transaction are locked
//! with `SELECT ... FOR UPDATE`, so concurrent bookings against the same
//! event serialize on the event row.
//!
//! # Example
//!
//! ```no_run
//! use delayline_postgres::{PgTransactionManager, connect, migrate};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = connect("postgres://localhost/booker", 10).await?;
//! migrate(&pool).await?;
//! let tx_manager = PgTransactionManager::new(pool);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod repository;
mod transaction;

pub use repository::PgBookingRepository;
pub use transaction::PgTransactionManager;

use delayline_core::repository::RepositoryError;
use delayline_runtime::retry::{RetryPolicy, retry_with_predicate};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Open a connection pool, retrying transient failures with the store
/// adapter policy.
///
/// # Errors
///
/// Returns [`RepositoryError::Database`] if no connection could be
/// established.
pub async fn connect(dsn: &str, max_connections: u32) -> Result<PgPool, RepositoryError> {
    let pool = retry_with_predicate(
        RetryPolicy::store_adapter(),
        || PgPoolOptions::new().max_connections(max_connections).connect(dsn),
        is_transient,
    )
    .await
    .map_err(|e| RepositoryError::Database(format!("Failed to connect to Postgres: {e}")))?;

    tracing::info!(max_connections, "Connected to Postgres");
    Ok(pool)
}

/// Apply the bundled migrations.
///
/// # Errors
///
/// Returns [`RepositoryError::Database`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), RepositoryError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Migration failed: {e}")))?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// Errors worth another attempt: the server was unreachable or the pool had
/// no free connection in time.
pub(crate) const fn is_transient(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
}

pub(crate) fn database_error(context: &str, error: &sqlx::Error) -> RepositoryError {
    RepositoryError::Database(format!("{context}: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_level_errors_are_transient() {
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
        assert!(is_transient(&sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused"
        ))));
        assert!(!is_transient(&sqlx::Error::RowNotFound));
        assert!(!is_transient(&sqlx::Error::PoolClosed));
    }

    #[test]
    fn database_error_keeps_context() {
        let err = database_error("insert booking", &sqlx::Error::RowNotFound);
        assert!(matches!(err, RepositoryError::Database(msg) if msg.starts_with("insert booking: ")));
    }
}
