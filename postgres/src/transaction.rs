use crate::repository::PgBookingRepository;
use crate::{database_error, is_transient};
use delayline_core::repository::{BookingRepository, RepositoryError, TransactionManager};
use delayline_runtime::retry::{RetryPolicy, retry_with_predicate};
use futures::future::BoxFuture;
use sqlx::{PgPool, Postgres, Transaction};

/// Transaction manager over a Postgres pool.
#[derive(Clone)]
pub struct PgTransactionManager {
    pool: PgPool,
    begin_policy: RetryPolicy,
}

impl PgTransactionManager {
    /// Wrap a pool. Beginning a transaction is retried with
    /// [`RetryPolicy::store_adapter`].
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self {
            pool,
            begin_policy: RetryPolicy::store_adapter(),
        }
    }

    /// Replace the retry policy used when beginning a transaction.
    #[must_use]
    pub fn with_begin_policy(mut self, policy: RetryPolicy) -> Self {
        self.begin_policy = policy;
        self
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, RepositoryError> {
        retry_with_predicate(
            self.begin_policy.clone(),
            || async {
                let mut tx = self.pool.begin().await?;
                sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
                    .execute(&mut *tx)
                    .await?;
                Ok(tx)
            },
            is_transient,
        )
        .await
        .map_err(|e| database_error("begin transaction", &e))
    }
}

impl std::fmt::Debug for PgTransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTransactionManager")
            .field("pool_size", &self.pool.size())
            .finish_non_exhaustive()
    }
}

impl TransactionManager for PgTransactionManager {
    fn transaction<'a, T, E, F>(&'a self, work: F) -> BoxFuture<'a, Result<T, E>>
    where
        T: Send + 'a,
        E: From<RepositoryError> + Send + 'a,
        F: for<'t> FnOnce(&'t mut dyn BookingRepository) -> BoxFuture<'t, Result<T, E>>
            + Send
            + 'a,
    {
        Box::pin(async move {
            let mut repo = PgBookingRepository::new(self.begin().await?);
            let outcome = {
                let tx: &mut dyn BookingRepository = &mut repo;
                work(tx).await
            };

            match outcome {
                Ok(value) => {
                    repo.into_inner()
                        .commit()
                        .await
                        .map_err(|e| database_error("commit", &e))?;
                    Ok(value)
                }
                Err(err) => {
                    if let Err(e) = repo.into_inner().rollback().await {
                        tracing::warn!(error = %e, "Rollback failed");
                    }
                    Err(err)
                }
            }
        })
    }
}
