//! Process wiring: adapters, background loops, HTTP listeners, shutdown.

use crate::api::{AppState, router};
use crate::config::Config;
use crate::service::NotificationService;
use crate::telegram::TelegramSender;
use anyhow::Context;
use axum::Router;
use delayline_core::environment::{Clock, SystemClock};
use delayline_core::queue::DurableQueue;
use delayline_core::receipt::ReceiptPublisher;
use delayline_core::store::{NotificationStore, SchedulingIndex};
use delayline_rabbitmq::RabbitQueue;
use delayline_redis::RedisBackend;
use delayline_redpanda::ReceiptBus;
use delayline_runtime::metrics::MetricsServer;
use delayline_runtime::{ConsumerWorker, Scheduler, SenderRegistry};
use delayline_web::server::{bind_all, join_all, shutdown_signal, spawn_servers};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Time each background task gets to finish after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// A fully wired notifier, ready to run.
pub struct Application {
    app: Router,
    listeners: Vec<TcpListener>,
    scheduler: Scheduler,
    consumer: ConsumerWorker,
    queue: Arc<RabbitQueue>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Application {
    /// Connect every adapter and bind the listeners.
    ///
    /// # Errors
    ///
    /// Fails if any backend is unreachable, the metrics recorder cannot be
    /// installed or an address cannot be bound.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let metrics = if config.metrics.enabled {
            let mut server = MetricsServer::new();
            server.start().context("installing metrics recorder")?;
            Some(Arc::new(server))
        } else {
            None
        };

        let backend = RedisBackend::new(config.redis.connection_info()?)
            .await
            .context("connecting to redis")?;
        backend.ping().await.context("pinging redis")?;
        let store: Arc<dyn NotificationStore> = Arc::new(backend.clone());
        let index: Arc<dyn SchedulingIndex> = Arc::new(backend);

        let queue = Arc::new(
            RabbitQueue::connect(&config.rabbitmq.settings())
                .await
                .context("connecting to rabbitmq")?,
        );
        let durable: Arc<dyn DurableQueue> = queue.clone();

        let telegram = TelegramSender::with_api_base(
            &config.telegram.api_base,
            &config.telegram.token,
            config.telegram.timeout,
        )
        .context("building telegram client")?;
        if let Err(e) = telegram.verify().await {
            warn!(error = %e, "Telegram token check failed, sends will be retried");
        }

        let receipts: Option<Arc<dyn ReceiptPublisher>> = match &config.kafka {
            Some(kafka) => {
                let bus = ReceiptBus::builder()
                    .brokers(kafka.brokers.clone())
                    .topic(kafka.topic.clone())
                    .build()
                    .context("creating receipt producer")?;
                info!(topic = %kafka.topic, "Receipts enabled");
                Some(Arc::new(bus))
            }
            None => {
                info!("Receipts disabled");
                None
            }
        };

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (shutdown_tx, _) = broadcast::channel(1);

        let scheduler = Scheduler::new(
            store.clone(),
            index.clone(),
            durable.clone(),
            clock.clone(),
            shutdown_tx.subscribe(),
        )
        .with_config(config.scheduler_config()?);

        let mut consumer = ConsumerWorker::new(
            durable,
            store.clone(),
            index.clone(),
            SenderRegistry::new().with_sender(Arc::new(telegram)),
            clock.clone(),
            shutdown_tx.subscribe(),
        )
        .with_config(config.consumer_config());
        if let Some(receipts) = receipts {
            consumer = consumer.with_receipts(receipts);
        }

        let app = router(AppState {
            service: NotificationService::new(store, index, clock),
            metrics,
        });
        let listeners = bind_all(&config.server.addrs)
            .await
            .context("binding listeners")?;

        Ok(Self {
            app,
            listeners,
            scheduler,
            consumer,
            queue,
            shutdown_tx,
        })
    }

    /// Run until SIGINT/SIGTERM, then stop ingress, let the loops finish
    /// their current item and close the queue connection.
    ///
    /// # Errors
    ///
    /// Currently infallible once built; kept fallible for the binary.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut tasks = vec![
            ("scheduler", self.scheduler.spawn()),
            ("consumer", self.consumer.spawn()),
        ];
        tasks.extend(
            spawn_servers(self.listeners, &self.app, &self.shutdown_tx)
                .into_iter()
                .map(|handle| ("http", handle)),
        );
        info!("Notifier running");

        shutdown_signal().await;
        info!("Shutting down");
        let _ = self.shutdown_tx.send(());

        join_all(tasks, SHUTDOWN_GRACE).await;

        if let Err(e) = self.queue.close().await {
            warn!(error = %e, "Failed to close rabbitmq connection");
        }
        info!("Notifier stopped");
        Ok(())
    }
}
