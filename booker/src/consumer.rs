//! Cancellation consumer: applies fired payment deadlines.
//!
//! Reads send receipts from the notifier's topic, recovers booking and event
//! ids from the message text and runs the cancel transaction.
//!
//! ```text
//! decode receipt ──fail──▶ ack (poison)
//!       │
//! parse message ──fail──▶ ack (not a payment deadline)
//!       │
//! cancel ──ok──────────────────────▶ ack
//!        ──already cancelled───────▶ ack
//!        ──not found / conflict────▶ ack
//!        ──database (after retry)──▶ nack (leave uncommitted), resubscribe
//!        ──corrupt state───────────▶ abort
//! ```
//!
//! A requeued receipt blocks later commits on its partition, and the
//! subscription is dropped right away so the group reads again from the
//! requeued receipt instead of moving past it.
//!
//! Redelivery of a receipt finds the booking already cancelled, so applying
//! the same receipt twice leaves capacity unchanged.

use crate::error::BookingError;
use crate::service::BookingService;
use delayline_core::booking::parse_cancellation_message;
use delayline_core::queue::{Delivery, DeliveryStream, QueueError};
use delayline_core::receipt::{NotificationReceipt, ReceiptSubscriber};
use delayline_core::repository::TransactionManager;
use delayline_runtime::metrics::BookingMetrics;
use delayline_runtime::retry::{RetryPolicy, retry_with_predicate};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// How a receipt was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationOutcome {
    /// The booking was cancelled and its seat released.
    Cancelled,
    /// The booking was already cancelled.
    Duplicate,
    /// The booking is gone or can no longer be cancelled; acknowledged.
    Ignored,
    /// The receipt is not a payment-deadline message; acknowledged.
    Poison,
    /// The store kept failing; left uncommitted for redelivery.
    Retry,
}

impl CancellationOutcome {
    /// Metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Duplicate => "duplicate",
            Self::Ignored => "ignored",
            Self::Poison => "poison",
            Self::Retry => "retry",
        }
    }
}

/// Why a subscription stopped being read.
enum StreamEnd {
    Shutdown,
    Requeued,
    Closed,
}

/// Long-running receipt consumer.
pub struct CancellationConsumer<M> {
    subscriber: Arc<dyn ReceiptSubscriber>,
    service: BookingService<M>,
    retry_policy: RetryPolicy,
    reconnect_delay: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl<M: TransactionManager + Send + 'static> CancellationConsumer<M> {
    /// Consumer that retries database failures with the store adapter policy
    /// and resubscribes 5 s after the stream ends.
    #[must_use]
    pub fn new(
        subscriber: Arc<dyn ReceiptSubscriber>,
        service: BookingService<M>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            subscriber,
            service,
            retry_policy: RetryPolicy::store_adapter(),
            reconnect_delay: Duration::from_secs(5),
            shutdown,
        }
    }

    /// Replace the policy for transient database failures.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Replace the wait before resubscribing.
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Spawn the subscribe-process-reconnect loop.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Subscribe-process-reconnect loop; returns on shutdown.
    pub async fn run(&mut self) {
        info!(component = "cancellations", "Cancellation consumer started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => break,
                subscribed = self.subscriber.subscribe() => {
                    match subscribed {
                        Ok(mut stream) => {
                            match self.process_stream(&mut stream).await {
                                StreamEnd::Shutdown => break,
                                StreamEnd::Requeued => warn!(
                                    component = "cancellations",
                                    "Receipt requeued, resubscribing in {:?}",
                                    self.reconnect_delay
                                ),
                                StreamEnd::Closed => warn!(
                                    component = "cancellations",
                                    "Receipt stream ended, resubscribing in {:?}",
                                    self.reconnect_delay
                                ),
                            }
                            drop(stream);
                        }
                        Err(e) => {
                            error!(
                                component = "cancellations",
                                error = %e,
                                "Failed to subscribe, retrying in {:?}",
                                self.reconnect_delay
                            );
                        }
                    }

                    tokio::select! {
                        _ = self.shutdown.recv() => break,
                        () = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }

        info!(component = "cancellations", "Cancellation consumer stopped");
    }

    async fn process_stream(&mut self, stream: &mut DeliveryStream) -> StreamEnd {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => return StreamEnd::Shutdown,
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        if self.handle(delivery).await == CancellationOutcome::Retry {
                            return StreamEnd::Requeued;
                        }
                    }
                    Some(Err(e)) => {
                        error!(component = "cancellations", error = %e, "Error receiving receipt");
                    }
                    None => return StreamEnd::Closed,
                },
            }
        }
    }

    /// Apply one receipt and settle it.
    pub async fn handle(&self, delivery: Delivery) -> CancellationOutcome {
        let outcome = self.process(delivery).await;
        BookingMetrics::record_cancellation_event(outcome.as_str());
        outcome
    }

    async fn process(&self, delivery: Delivery) -> CancellationOutcome {
        let receipt: NotificationReceipt = match serde_json::from_slice(delivery.payload()) {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(component = "cancellations", error = %e, "Undecodable receipt, skipping");
                settle(delivery.ack().await);
                return CancellationOutcome::Poison;
            }
        };

        let event = match parse_cancellation_message(&receipt.message) {
            Ok(event) => event,
            Err(e) => {
                debug!(
                    component = "cancellations",
                    notification_id = %receipt.notification_id,
                    error = %e,
                    "Receipt is not a payment deadline, skipping"
                );
                settle(delivery.ack().await);
                return CancellationOutcome::Poison;
            }
        };

        let result = retry_with_predicate(
            self.retry_policy.clone(),
            || self.service.cancel(&event.booking_id, Some(&event.event_id)),
            BookingError::is_transient,
        )
        .await;

        let outcome = match result {
            Ok(_) => {
                info!(
                    component = "cancellations",
                    booking_id = %event.booking_id,
                    event_id = %event.event_id,
                    "Payment deadline applied"
                );
                CancellationOutcome::Cancelled
            }
            Err(BookingError::AlreadyCancelled(_)) => {
                debug!(component = "cancellations", booking_id = %event.booking_id, "Booking already cancelled");
                CancellationOutcome::Duplicate
            }
            Err(e) if e.is_transient() => {
                error!(
                    component = "cancellations",
                    booking_id = %event.booking_id,
                    error = %e,
                    "Failed to apply payment deadline"
                );
                settle(delivery.nack(true).await);
                return CancellationOutcome::Retry;
            }
            Err(e) => {
                e.abort_if_corrupt();
                warn!(
                    component = "cancellations",
                    booking_id = %event.booking_id,
                    event_id = %event.event_id,
                    error = %e,
                    "Payment deadline not applicable, skipping"
                );
                CancellationOutcome::Ignored
            }
        };

        settle(delivery.ack().await);
        outcome
    }
}

fn settle(result: Result<(), QueueError>) {
    if let Err(e) = result {
        warn!(component = "cancellations", error = %e, "Failed to settle receipt");
    }
}
