//! Kafka-compatible send-receipt stream (Redpanda, Apache Kafka, MSK, ...).
//!
//! The notifier publishes one `{notification_id, message}` JSON record per
//! terminal delivery outcome, keyed by notification id. The booker consumes
//! the same topic to learn that a payment timer fired.
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits:
//! - Auto-commit is disabled.
//! - Each record is handed to the subscriber as a
//!   [`Delivery`](delayline_core::queue::Delivery); acknowledging it commits
//!   the record's offset.
//! - `nack(false)` (poison) also commits so the record is not read again;
//!   `nack(true)` leaves the offset uncommitted.
//! - Offsets are cumulative per partition, so once a record is requeued no
//!   later acknowledgement on that partition commits past it. The next
//!   subscription in the group starts again from the requeued record.
//! - Subscribers must be idempotent.
//!
//! # Example
//!
//! ```no_run
//! use delayline_redpanda::ReceiptBus;
//! use delayline_core::receipt::{NotificationReceipt, ReceiptPublisher};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = ReceiptBus::builder()
//!     .brokers("localhost:9092")
//!     .topic("notifications")
//!     .consumer_group("booker")
//!     .build()?;
//!
//! bus.publish(&NotificationReceipt {
//!     notification_id: "n-1".to_string(),
//!     message: "hello".to_string(),
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use delayline_core::queue::{Acknowledger, Delivery, DeliveryStream, QueueError};
use delayline_core::receipt::{
    NotificationReceipt, PublishError, ReceiptPublisher, ReceiptSubscriber,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Producer and consumer factory for one receipt topic.
///
/// The producer is created eagerly; each [`ReceiptSubscriber::subscribe`]
/// call creates a fresh consumer in the configured group.
pub struct ReceiptBus {
    /// Kafka producer for publishing receipts
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Receipt topic
    topic: String,
    /// Producer timeout
    timeout: Duration,
    /// Consumer group ID
    consumer_group: String,
    /// Delivery buffer size for subscribers
    buffer_size: usize,
    /// Auto offset reset policy
    auto_offset_reset: String,
}

impl ReceiptBus {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> ReceiptBusBuilder {
        ReceiptBusBuilder::default()
    }

    /// Receipt topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Broker addresses.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

impl std::fmt::Debug for ReceiptBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptBus")
            .field("brokers", &self.brokers)
            .field("topic", &self.topic)
            .field("consumer_group", &self.consumer_group)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ReceiptBus`].
#[derive(Default)]
pub struct ReceiptBusBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl ReceiptBusBuilder {
    /// Comma-separated broker addresses (e.g. `"localhost:9092"`).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Receipt topic.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"` or `"all"`. Default: `"all"`.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Producer send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group for subscriptions. Default: `delayline-{topic}`.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Deliveries buffered between the Kafka consumer and the subscriber.
    /// Default: 64. Zero is treated as one.
    #[must_use]
    pub const fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Where a new consumer group starts reading. Default: `"earliest"`, so
    /// receipts published before the booker first starts are not lost.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`ReceiptBus`].
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::ConnectionFailed`] if brokers or topic are not
    /// set or the producer cannot be created.
    pub fn build(self) -> Result<ReceiptBus, PublishError> {
        let brokers = self
            .brokers
            .filter(|b| !b.is_empty())
            .ok_or_else(|| PublishError::ConnectionFailed("Brokers not configured".to_string()))?;
        let topic = self
            .topic
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PublishError::ConnectionFailed("Topic not configured".to_string()))?;
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", &acks)
            .create()
            .map_err(|e| {
                PublishError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let consumer_group = self
            .consumer_group
            .unwrap_or_else(|| format!("delayline-{topic}"));
        let buffer_size = self.buffer_size.unwrap_or(64).max(1);
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            acks = %acks,
            consumer_group = %consumer_group,
            "ReceiptBus created"
        );

        Ok(ReceiptBus {
            producer,
            brokers,
            topic,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group,
            buffer_size,
            auto_offset_reset,
        })
    }
}

#[async_trait]
impl ReceiptPublisher for ReceiptBus {
    async fn publish(&self, receipt: &NotificationReceipt) -> Result<(), PublishError> {
        let payload =
            serde_json::to_vec(receipt).map_err(|e| PublishError::Serialization(e.to_string()))?;

        // Keyed by notification id: all receipts for one id share a partition.
        let record = FutureRecord::to(&self.topic)
            .payload(&payload)
            .key(receipt.notification_id.as_bytes());

        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => {
                tracing::debug!(
                    topic = %self.topic,
                    partition,
                    offset,
                    notification_id = %receipt.notification_id,
                    "Receipt published"
                );
                Ok(())
            }
            Err((kafka_error, _)) => {
                tracing::error!(
                    topic = %self.topic,
                    notification_id = %receipt.notification_id,
                    error = %kafka_error,
                    "Failed to publish receipt"
                );
                Err(PublishError::PublishFailed {
                    topic: self.topic.clone(),
                    reason: kafka_error.to_string(),
                })
            }
        }
    }
}

/// Lowest requeued offset per partition, for one subscription.
type Holds = Arc<Mutex<HashMap<i32, i64>>>;

/// Offset to commit once the record at `offset` is settled: the next one,
/// unless an earlier requeued record on the partition is still outstanding.
fn commit_target(offset: i64, hold: Option<i64>) -> i64 {
    hold.map_or(offset + 1, |held| held.min(offset + 1))
}

/// Commits one record's offset when its delivery is settled.
struct OffsetCommit {
    consumer: Arc<StreamConsumer>,
    holds: Holds,
    topic: String,
    partition: i32,
    offset: i64,
}

impl OffsetCommit {
    fn commit(&self) -> Result<(), QueueError> {
        let hold = self
            .holds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.partition)
            .copied();
        let target = commit_target(self.offset, hold);

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, self.partition, Offset::Offset(target))
            .map_err(|e| QueueError::AckFailed(format!("Invalid offset: {e}")))?;
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| QueueError::AckFailed(format!("Failed to commit offset: {e}")))
    }
}

#[async_trait]
impl Acknowledger for OffsetCommit {
    async fn ack(&self) -> Result<(), QueueError> {
        self.commit()
    }

    async fn nack(&self, requeue: bool) -> Result<(), QueueError> {
        if requeue {
            self.holds
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(self.partition)
                .and_modify(|held| *held = (*held).min(self.offset))
                .or_insert(self.offset);
            tracing::warn!(
                topic = %self.topic,
                partition = self.partition,
                offset = self.offset,
                "Leaving receipt uncommitted (redelivered to the next subscription)"
            );
            return Ok(());
        }
        self.commit()
    }
}

#[async_trait]
impl ReceiptSubscriber for ReceiptBus {
    async fn subscribe(&self) -> Result<DeliveryStream, QueueError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| QueueError::ConsumeFailed(format!("Failed to create consumer: {e}")))?;

        consumer.subscribe(&[self.topic.as_str()]).map_err(|e| {
            QueueError::ConsumeFailed(format!("Failed to subscribe to {}: {e}", self.topic))
        })?;

        tracing::info!(
            topic = %self.topic,
            consumer_group = %self.consumer_group,
            auto_offset_reset = %self.auto_offset_reset,
            manual_commit = true,
            "Subscribed to receipt topic"
        );

        let consumer = Arc::new(consumer);
        let holds = Holds::default();
        let (tx, mut rx) = tokio::sync::mpsc::channel(self.buffer_size);

        // The task owns the consumer stream and forwards records. It exits as
        // soon as the subscriber is dropped so the group can rebalance.
        let task_consumer = Arc::clone(&consumer);
        tokio::spawn(async move {
            use futures::StreamExt;

            let mut stream = task_consumer.stream();

            loop {
                let msg_result = tokio::select! {
                    () = tx.closed() => break,
                    next = stream.next() => match next {
                        Some(msg_result) => msg_result,
                        None => break,
                    },
                };
                let item = match msg_result {
                    Ok(message) => {
                        let commit = OffsetCommit {
                            consumer: Arc::clone(&task_consumer),
                            holds: Arc::clone(&holds),
                            topic: message.topic().to_string(),
                            partition: message.partition(),
                            offset: message.offset(),
                        };

                        let Some(payload) = message.payload() else {
                            tracing::warn!(
                                topic = message.topic(),
                                partition = message.partition(),
                                offset = message.offset(),
                                "Skipping record with no payload"
                            );
                            if let Err(e) = commit.commit() {
                                tracing::warn!(error = %e, "Failed to commit empty record");
                            }
                            continue;
                        };

                        tracing::trace!(
                            topic = message.topic(),
                            partition = message.partition(),
                            offset = message.offset(),
                            "Received receipt"
                        );
                        Ok(Delivery::new(payload.to_vec(), commit))
                    }
                    Err(e) => Err(QueueError::ConsumeFailed(format!(
                        "Failed to receive record: {e}"
                    ))),
                };

                if tx.send(item).await.is_err() {
                    tracing::debug!("Subscriber dropped, exiting consumer task");
                    break;
                }
            }

            tracing::debug!("Receipt consumer task exiting");
        });

        let stream = async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        };

        Ok(Box::pin(stream))
    }
}
