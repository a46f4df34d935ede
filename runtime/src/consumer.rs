//! Consumer worker: drains the durable queue and delivers each envelope
//! through the sender registered for its channel.
//!
//! # Per-delivery flow
//!
//! ```text
//! decode envelope ──fail──▶ nack (no requeue)
//!       │
//! re-read stored record ──missing──▶ ack
//!       │                ──terminal──▶ ack
//!       │                ──store error──▶ nack (requeue)
//! send with deadline
//!       ├─ ok ─────────▶ Sent      ─┐
//!       ├─ permanent ──▶ Failed    ─┼─▶ persist ──fail──▶ nack (requeue)
//!       └─ retryable ──▶ Retrying  ─┘      │
//!                         + retry set      ▼
//!                                         ack (+ receipt on Sent/Failed)
//! ```
//!
//! The envelope is a snapshot taken when the scheduler published it. Status
//! decisions are made on the stored record so that a cancellation issued
//! after publication still wins.
//!
//! # Lifecycle
//!
//! [`ConsumerWorker::run`] subscribes, processes deliveries until the stream
//! ends, then resubscribes after `reconnect_delay`. The shutdown signal is
//! checked between deliveries; the delivery in hand is always settled first.

use crate::metrics::ConsumerMetrics;
use crate::registry::SenderRegistry;
use crate::retry::backoff;
use chrono::{DateTime, Utc};
use delayline_core::environment::Clock;
use delayline_core::notification::{Notification, ScheduleSet};
use delayline_core::queue::{Delivery, DeliveryStream, DurableQueue, QueueError};
use delayline_core::receipt::{NotificationReceipt, ReceiptPublisher};
use delayline_core::sender::SendError;
use delayline_core::store::{NotificationStore, SchedulingIndex};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Consumer tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Deadline for a single sender call.
    pub send_timeout: Duration,
    /// Retries allowed before a retryable failure becomes terminal.
    /// `None` retries forever.
    pub max_retries: Option<u32>,
    /// Wait before resubscribing after the delivery stream ends.
    pub reconnect_delay: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(10),
            max_retries: None,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Delivered; record is Sent.
    Sent,
    /// Send failed; record is Retrying and in the retry set.
    Retrying,
    /// Send failed for good; record is Failed.
    Failed,
    /// Record missing or already terminal; acknowledged without sending.
    Skipped,
    /// Envelope could not be decoded; rejected without requeue.
    Poison,
    /// Store unavailable; rejected with requeue for redelivery.
    Requeued,
}

impl Outcome {
    /// Metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Poison => "poison",
            Self::Requeued => "requeued",
        }
    }
}

/// Long-running queue consumer.
pub struct ConsumerWorker {
    queue: Arc<dyn DurableQueue>,
    store: Arc<dyn NotificationStore>,
    index: Arc<dyn SchedulingIndex>,
    registry: SenderRegistry,
    receipts: Option<Arc<dyn ReceiptPublisher>>,
    clock: Arc<dyn Clock>,
    config: ConsumerConfig,
    shutdown: broadcast::Receiver<()>,
}

impl ConsumerWorker {
    /// Create a worker with the default configuration and no receipt stream.
    #[must_use]
    pub fn new(
        queue: Arc<dyn DurableQueue>,
        store: Arc<dyn NotificationStore>,
        index: Arc<dyn SchedulingIndex>,
        registry: SenderRegistry,
        clock: Arc<dyn Clock>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            queue,
            store,
            index,
            registry,
            receipts: None,
            clock,
            config: ConsumerConfig::default(),
            shutdown,
        }
    }

    /// Publish a receipt for every terminal outcome.
    #[must_use]
    pub fn with_receipts(mut self, receipts: Arc<dyn ReceiptPublisher>) -> Self {
        self.receipts = Some(receipts);
        self
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the subscribe-process-reconnect loop as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Subscribe-process-reconnect loop; returns on shutdown.
    pub async fn run(&mut self) {
        info!(component = "consumer", channels = ?self.registry.channels(), "Consumer started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(component = "consumer", "Consumer received shutdown signal");
                    break;
                }
                subscribed = self.queue.consume() => {
                    match subscribed {
                        Ok(mut stream) => {
                            info!(component = "consumer", "Subscribed to durable queue");
                            if self.process_stream(&mut stream).await {
                                break;
                            }
                            warn!(
                                component = "consumer",
                                "Delivery stream ended, resubscribing in {:?}",
                                self.config.reconnect_delay
                            );
                        }
                        Err(e) => {
                            error!(
                                component = "consumer",
                                error = %e,
                                "Failed to subscribe, retrying in {:?}",
                                self.config.reconnect_delay
                            );
                        }
                    }

                    tokio::select! {
                        _ = self.shutdown.recv() => {
                            info!(component = "consumer", "Consumer received shutdown signal");
                            break;
                        }
                        () = tokio::time::sleep(self.config.reconnect_delay) => {}
                    }
                }
            }
        }

        info!(component = "consumer", "Consumer stopped");
    }

    /// Returns `true` when stopped by the shutdown signal, `false` when the
    /// stream ended.
    async fn process_stream(&mut self, stream: &mut DeliveryStream) -> bool {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(component = "consumer", "Consumer received shutdown signal during processing");
                    return true;
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(delivery)) => {
                            self.handle(delivery).await;
                        }
                        Some(Err(e)) => {
                            error!(component = "consumer", error = %e, "Error receiving delivery");
                        }
                        None => return false,
                    }
                }
            }
        }
    }

    /// Process one delivery to completion and settle it.
    pub async fn handle(&self, delivery: Delivery) -> Outcome {
        let outcome = self.process(delivery).await;
        ConsumerMetrics::record_outcome(outcome.as_str());
        outcome
    }

    async fn process(&self, delivery: Delivery) -> Outcome {
        let envelope = match Notification::from_json(delivery.payload()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(component = "consumer", error = %e, "Undecodable envelope, discarding");
                settle(delivery.nack(false).await, "nack");
                return Outcome::Poison;
            }
        };
        let id = envelope.id;

        let mut notification = match self.store.get(&id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                warn!(component = "consumer", notification_id = %id, "Envelope has no stored record, treating as handled");
                settle(delivery.ack().await, "ack");
                return Outcome::Skipped;
            }
            Err(e) => {
                error!(component = "consumer", notification_id = %id, error = %e, "Failed to load notification, requeueing");
                settle(delivery.nack(true).await, "nack");
                return Outcome::Requeued;
            }
        };

        if notification.status.is_terminal() {
            debug!(
                component = "consumer",
                notification_id = %id,
                status = %notification.status,
                "Notification already terminal, skipping send"
            );
            settle(delivery.ack().await, "ack");
            return Outcome::Skipped;
        }

        let result = self.deliver(&notification).await;
        let now = self.clock.now();
        let outcome = self.apply(&mut notification, result, now);

        if let Err(e) = self.store.save(&notification).await {
            error!(component = "consumer", notification_id = %id, error = %e, "Failed to persist send outcome, requeueing");
            settle(delivery.nack(true).await, "nack");
            return Outcome::Requeued;
        }

        if outcome == Outcome::Retrying {
            let at = notification.next_attempt_at.unwrap_or(now);
            if let Err(e) = self.index.schedule(ScheduleSet::Retry, &id, at).await {
                error!(component = "consumer", notification_id = %id, error = %e, "Failed to add to retry set, requeueing");
                settle(delivery.nack(true).await, "nack");
                return Outcome::Requeued;
            }
        }

        settle(delivery.ack().await, "ack");

        if matches!(outcome, Outcome::Sent | Outcome::Failed) {
            self.publish_receipt(&notification).await;
        }

        outcome
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), SendError> {
        let Some(sender) = self.registry.get(&notification.channel) else {
            return Err(SendError::Permanent(format!(
                "unsupported channel: {}",
                notification.channel
            )));
        };

        let started = Instant::now();
        let result = tokio::time::timeout(self.config.send_timeout, sender.send(notification))
            .await
            .unwrap_or_else(|_| {
                Err(SendError::Retryable(format!(
                    "send timed out after {:?}",
                    self.config.send_timeout
                )))
            });
        ConsumerMetrics::record_send(&notification.channel, started.elapsed());
        result
    }

    fn apply(
        &self,
        notification: &mut Notification,
        result: Result<(), SendError>,
        now: DateTime<Utc>,
    ) -> Outcome {
        let id = notification.id.clone();
        match result {
            Ok(()) => {
                info!(component = "consumer", notification_id = %id, retry_count = notification.retry_count, "Notification sent");
                notification.mark_sent(now);
                Outcome::Sent
            }
            Err(SendError::Permanent(reason)) => {
                warn!(component = "consumer", notification_id = %id, error = %reason, "Permanent send failure");
                notification.mark_failed(reason, now);
                Outcome::Failed
            }
            Err(SendError::Retryable(reason)) => {
                let exhausted = matches!(
                    self.config.max_retries,
                    Some(max) if notification.retry_count >= max
                );
                if exhausted {
                    warn!(
                        component = "consumer",
                        notification_id = %id,
                        retry_count = notification.retry_count,
                        error = %reason,
                        "Retry limit reached, giving up"
                    );
                    notification.mark_failed(reason, now);
                    return Outcome::Failed;
                }

                let attempt = notification.retry_count.saturating_add(1);
                let next_attempt_at = crate::offset(now, backoff(attempt));
                warn!(
                    component = "consumer",
                    notification_id = %id,
                    retry_count = attempt,
                    next_attempt_at = %next_attempt_at,
                    error = %reason,
                    "Send failed, scheduling retry"
                );
                notification.mark_retrying(reason, next_attempt_at, now);
                Outcome::Retrying
            }
        }
    }

    async fn publish_receipt(&self, notification: &Notification) {
        let Some(receipts) = &self.receipts else {
            return;
        };
        let receipt = NotificationReceipt {
            notification_id: notification.id.clone(),
            message: notification.message.clone(),
        };
        if let Err(e) = receipts.publish(&receipt).await {
            error!(component = "consumer", notification_id = %notification.id, error = %e, "Failed to publish receipt");
        }
    }
}

fn settle(result: Result<(), QueueError>, action: &'static str) {
    if let Err(e) = result {
        error!(component = "consumer", action, error = %e, "Failed to settle delivery");
    }
}
