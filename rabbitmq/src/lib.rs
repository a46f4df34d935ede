//! `RabbitMQ` implementation of the durable queue.
//!
//! - The queue is declared durable; messages are published persistent
//!   (`delivery_mode = 2`) through a channel in confirm mode, so `publish`
//!   returns only after the broker has taken responsibility for the message.
//! - Consumers use manual acknowledgement with a bounded prefetch. An
//!   unacknowledged message is redelivered when the channel closes.
//!
//! The connection itself is not re-established; each [`DurableQueue::consume`]
//! opens a fresh channel, so a consumer loop that resubscribes recovers from
//! channel-level failures.
//!
//! # Example
//!
//! ```no_run
//! use delayline_rabbitmq::{RabbitQueue, RabbitSettings};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = RabbitQueue::connect(&RabbitSettings {
//!     host: "localhost".to_string(),
//!     port: 5672,
//!     username: "guest".to_string(),
//!     password: "guest".to_string(),
//!     queue_name: "notifications".to_string(),
//!     prefetch: 10,
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

use async_trait::async_trait;
use delayline_core::queue::{Acknowledger, Delivery, DeliveryStream, DurableQueue, QueueError};
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};

/// Persistent delivery mode.
const PERSISTENT: u8 = 2;

/// Connection and queue settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RabbitSettings {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
    /// Queue to declare, publish to and consume from.
    pub queue_name: String,
    /// Unacknowledged deliveries a consumer may hold.
    pub prefetch: u16,
}

impl RabbitSettings {
    /// AMQP URI for the default vhost.
    #[must_use]
    pub fn uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.username.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            ..AMQPUri::default()
        }
    }
}

/// Durable queue over one AMQP connection.
pub struct RabbitQueue {
    connection: Connection,
    publisher: Channel,
    queue_name: String,
    prefetch: u16,
}

impl RabbitQueue {
    /// Connect, open a confirm-mode publishing channel and declare the queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if the broker is unreachable
    /// or rejects the declaration.
    pub async fn connect(settings: &RabbitSettings) -> Result<Self, QueueError> {
        let connection = Connection::connect_uri(settings.uri(), ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::ConnectionFailed(format!("Failed to connect: {e}")))?;

        let publisher = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::ConnectionFailed(format!("Failed to open channel: {e}")))?;

        publisher
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| {
                QueueError::ConnectionFailed(format!("Failed to enable publisher confirms: {e}"))
            })?;

        declare(&publisher, &settings.queue_name).await?;

        tracing::info!(
            host = %settings.host,
            port = settings.port,
            queue = %settings.queue_name,
            prefetch = settings.prefetch,
            "Connected to RabbitMQ"
        );

        Ok(Self {
            connection,
            publisher,
            queue_name: settings.queue_name.clone(),
            prefetch: settings.prefetch,
        })
    }

    /// Queue name.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if the close handshake fails.
    pub async fn close(&self) -> Result<(), QueueError> {
        self.connection
            .close(200, "shutdown")
            .await
            .map_err(|e| QueueError::ConnectionFailed(format!("Failed to close connection: {e}")))
    }
}

impl std::fmt::Debug for RabbitQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabbitQueue")
            .field("queue_name", &self.queue_name)
            .field("prefetch", &self.prefetch)
            .finish_non_exhaustive()
    }
}

async fn declare(channel: &Channel, queue_name: &str) -> Result<(), QueueError> {
    channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| QueueError::ConnectionFailed(format!("Failed to declare {queue_name}: {e}")))?;
    Ok(())
}

/// Settles one AMQP delivery.
struct AmqpAcker {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::AckFailed(format!("ack: {e}")))
    }

    async fn nack(&self, requeue: bool) -> Result<(), QueueError> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await
            .map_err(|e| QueueError::AckFailed(format!("nack: {e}")))
    }
}

#[async_trait]
impl DurableQueue for RabbitQueue {
    async fn publish(&self, payload: &[u8]) -> Result<(), QueueError> {
        let confirm = self
            .publisher
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| QueueError::PublishFailed(e.to_string()))?
            .await
            .map_err(|e| QueueError::PublishFailed(format!("confirm: {e}")))?;

        if confirm.is_nack() {
            return Err(QueueError::PublishFailed(
                "broker rejected the message".to_string(),
            ));
        }
        Ok(())
    }

    async fn consume(&self) -> Result<DeliveryStream, QueueError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| QueueError::ConsumeFailed(format!("Failed to open channel: {e}")))?;

        declare(&channel, &self.queue_name).await?;

        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::ConsumeFailed(format!("Failed to set prefetch: {e}")))?;

        let consumer = channel
            .basic_consume(
                &self.queue_name,
                "delayline-consumer",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::ConsumeFailed(format!("Failed to start consumer: {e}")))?;

        tracing::info!(queue = %self.queue_name, prefetch = self.prefetch, "Consuming from RabbitMQ");

        // The closure owns the channel so it stays open while the stream lives.
        let stream = consumer.map(move |delivery| {
            let _channel = &channel;
            delivery
                .map(|delivery| {
                    Delivery::new(
                        delivery.data,
                        AmqpAcker {
                            acker: delivery.acker,
                        },
                    )
                })
                .map_err(|e| QueueError::ConsumeFailed(e.to_string()))
        });

        Ok(Box::pin(stream))
    }
}
