//! Process wiring: store, notifier client, cancellation consumer, HTTP
//! listeners, shutdown.

use crate::api::{AppState, router};
use crate::config::Config;
use crate::consumer::CancellationConsumer;
use crate::notifier_client::HttpNotifierClient;
use crate::service::BookingService;
use anyhow::Context;
use axum::Router;
use delayline_core::environment::{Clock, SystemClock};
use delayline_core::notifier_client::NotifierClient;
use delayline_postgres::PgTransactionManager;
use delayline_redpanda::ReceiptBus;
use delayline_runtime::metrics::MetricsServer;
use delayline_web::server::{bind_all, join_all, shutdown_signal, spawn_servers};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Time each background task gets to finish after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// A fully wired booker, ready to run.
pub struct Application {
    app: Router,
    listeners: Vec<TcpListener>,
    consumer: CancellationConsumer<PgTransactionManager>,
    transactions: PgTransactionManager,
    shutdown_tx: broadcast::Sender<()>,
}

impl Application {
    /// Connect to Postgres, apply migrations, create the receipt consumer
    /// and bind the listeners.
    ///
    /// # Errors
    ///
    /// Fails if Postgres is unreachable, a migration fails, the Kafka client
    /// cannot be created, the metrics recorder cannot be installed or an
    /// address cannot be bound.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let metrics = if config.metrics.enabled {
            let mut server = MetricsServer::new();
            server.start().context("installing metrics recorder")?;
            Some(Arc::new(server))
        } else {
            None
        };

        let pool = delayline_postgres::connect(
            &config.storage.master_dsn,
            config.storage.max_connections,
        )
        .await
        .context("connecting to postgres")?;
        delayline_postgres::migrate(&pool)
            .await
            .context("applying migrations")?;
        if !config.storage.slave_dsns.is_empty() {
            warn!(
                replicas = config.storage.slave_dsns.len(),
                "Read replicas configured but unused, every booking query locks rows on the primary"
            );
        }
        let transactions = PgTransactionManager::new(pool);

        let notifier: Arc<dyn NotifierClient> = Arc::new(
            HttpNotifierClient::new(&config.notif_addr, config.notifier_timeout)
                .context("building notifier client")?,
        );
        info!(notif_addr = %config.notif_addr, "Notifier client ready");

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let service = BookingService::new(transactions.clone(), notifier, clock);

        let receipts = ReceiptBus::builder()
            .brokers(config.kafka.brokers.clone())
            .topic(config.kafka.topic.clone())
            .consumer_group(config.kafka.group_id.clone())
            .build()
            .context("creating receipt consumer")?;

        let (shutdown_tx, _) = broadcast::channel(1);
        let consumer =
            CancellationConsumer::new(Arc::new(receipts), service.clone(), shutdown_tx.subscribe());

        let app = router(AppState { service, metrics });
        let listeners = bind_all(&config.server.addrs)
            .await
            .context("binding listeners")?;

        Ok(Self {
            app,
            listeners,
            consumer,
            transactions,
            shutdown_tx,
        })
    }

    /// Run until SIGINT/SIGTERM, then stop ingress, let the consumer finish
    /// the receipt in hand and close the pool.
    ///
    /// # Errors
    ///
    /// Currently infallible once built; kept fallible for the binary.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut tasks = vec![("cancellations", self.consumer.spawn())];
        tasks.extend(
            spawn_servers(self.listeners, &self.app, &self.shutdown_tx)
                .into_iter()
                .map(|handle| ("http", handle)),
        );
        info!("Booker running");

        shutdown_signal().await;
        info!("Shutting down");
        let _ = self.shutdown_tx.send(());

        join_all(tasks, SHUTDOWN_GRACE).await;

        self.transactions.pool().close().await;
        info!("Booker stopped");
        Ok(())
    }
}
