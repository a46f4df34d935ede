//! In-memory notifier ports: object store, scheduling index, durable queue,
//! channel sender and receipt publisher.

#![allow(clippy::unwrap_used)] // Test infrastructure

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use delayline_core::notification::{Notification, ScheduleSet, epoch_score};
use delayline_core::queue::{Acknowledger, Delivery, DeliveryStream, DurableQueue, QueueError};
use delayline_core::receipt::{
    NotificationReceipt, PublishError, ReceiptPublisher, ReceiptSubscriber,
};
use delayline_core::sender::{SendError, Sender};
use delayline_core::store::{NotificationStore, SchedulingIndex, StoreError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct BackendState {
    records: HashMap<String, Notification>,
    due: HashMap<String, i64>,
    retry: HashMap<String, i64>,
    failing_saves: usize,
    failing_pops: bool,
}

impl BackendState {
    fn set_mut(&mut self, set: ScheduleSet) -> &mut HashMap<String, i64> {
        match set {
            ScheduleSet::Due => &mut self.due,
            ScheduleSet::Retry => &mut self.retry,
        }
    }

    fn set(&self, set: ScheduleSet) -> &HashMap<String, i64> {
        match set {
            ScheduleSet::Due => &self.due,
            ScheduleSet::Retry => &self.retry,
        }
    }
}

/// Object store and scheduling index sharing one in-memory state, the way
/// the Redis adapter serves both ports from one connection.
///
/// Clones share state, so the same backend can be handed out as
/// `Arc<dyn NotificationStore>` and `Arc<dyn SchedulingIndex>`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl InMemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored record for `id`, if any.
    #[must_use]
    pub fn record(&self, id: &str) -> Option<Notification> {
        self.state.lock().unwrap().records.get(id).cloned()
    }

    /// Insert a record without touching the scheduling sets.
    pub fn insert(&self, notification: Notification) {
        self.state
            .lock()
            .unwrap()
            .records
            .insert(notification.id.clone(), notification);
    }

    /// Score of `id` in `set`, if present.
    #[must_use]
    pub fn score(&self, set: ScheduleSet, id: &str) -> Option<i64> {
        self.state.lock().unwrap().set(set).get(id).copied()
    }

    /// Ids in `set`, lowest score first.
    #[must_use]
    pub fn members(&self, set: ScheduleSet) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<(&String, &i64)> = state.set(set).iter().collect();
        entries.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
        entries.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Make the next `count` saves fail with a backend error.
    pub fn fail_next_saves(&self, count: usize) {
        self.state.lock().unwrap().failing_saves = count;
    }

    /// Make every `pop_due` fail until reset.
    pub fn fail_pops(&self, failing: bool) {
        self.state.lock().unwrap().failing_pops = failing;
    }
}

#[async_trait]
impl NotificationStore for InMemoryBackend {
    async fn save(&self, notification: &Notification) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_saves > 0 {
            state.failing_saves -= 1;
            return Err(StoreError::Backend("injected save failure".to_string()));
        }
        state
            .records
            .insert(notification.id.clone(), notification.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Notification>, StoreError> {
        Ok(self.state.lock().unwrap().records.get(id).cloned())
    }
}

#[async_trait]
impl SchedulingIndex for InMemoryBackend {
    async fn schedule(
        &self,
        set: ScheduleSet,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.state
            .lock()
            .unwrap()
            .set_mut(set)
            .insert(id.to_string(), epoch_score(at));
        Ok(())
    }

    async fn pop_due(
        &self,
        set: ScheduleSet,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_pops {
            return Err(StoreError::Backend("injected pop failure".to_string()));
        }

        let max = epoch_score(now);
        let mut ready: Vec<(String, i64)> = state
            .set(set)
            .iter()
            .filter(|(_, score)| **score <= max)
            .map(|(id, score)| (id.clone(), *score))
            .collect();
        ready.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        ready.truncate(limit);

        let members = state.set_mut(set);
        for (id, _) in &ready {
            members.remove(id);
        }
        Ok(ready.into_iter().map(|(id, _)| id).collect())
    }

    async fn save_and_unschedule(&self, notification: &Notification) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_saves > 0 {
            state.failing_saves -= 1;
            return Err(StoreError::Backend("injected save failure".to_string()));
        }
        state.due.remove(&notification.id);
        state.retry.remove(&notification.id);
        state
            .records
            .insert(notification.id.clone(), notification.clone());
        Ok(())
    }
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Positive acknowledgement.
    Ack,
    /// Negative acknowledgement.
    Nack {
        /// Whether redelivery was requested.
        requeue: bool,
    },
}

#[derive(Debug, Clone)]
struct RecordingAcker {
    settlements: Arc<Mutex<Vec<Settlement>>>,
}

#[async_trait]
impl Acknowledger for RecordingAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        self.settlements.lock().unwrap().push(Settlement::Ack);
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), QueueError> {
        self.settlements
            .lock()
            .unwrap()
            .push(Settlement::Nack { requeue });
        Ok(())
    }
}

#[derive(Debug, Default)]
struct QueueState {
    published: Vec<Vec<u8>>,
    failing_publishes: usize,
    subscriber: Option<mpsc::UnboundedSender<Vec<u8>>>,
    subscriptions: usize,
}

/// In-memory durable queue.
///
/// Records every accepted publish and every settlement. While a consumer is
/// attached, published payloads are also delivered to it.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueue {
    state: Arc<Mutex<QueueState>>,
    settlements: Arc<Mutex<Vec<Settlement>>>,
}

impl InMemoryQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads accepted so far, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().published.clone()
    }

    /// Accepted payloads decoded as notifications.
    #[must_use]
    pub fn published_notifications(&self) -> Vec<Notification> {
        self.published()
            .iter()
            .map(|bytes| Notification::from_json(bytes).unwrap())
            .collect()
    }

    /// Settlements recorded so far, in order.
    #[must_use]
    pub fn settlements(&self) -> Vec<Settlement> {
        self.settlements.lock().unwrap().clone()
    }

    /// How many times a consumer has attached.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.state.lock().unwrap().subscriptions
    }

    /// Make the next `count` publishes fail.
    pub fn fail_next_publishes(&self, count: usize) {
        self.state.lock().unwrap().failing_publishes = count;
    }

    /// Wrap `payload` in a delivery whose settlement is recorded by this queue.
    #[must_use]
    pub fn delivery(&self, payload: Vec<u8>) -> Delivery {
        Delivery::new(
            payload,
            RecordingAcker {
                settlements: Arc::clone(&self.settlements),
            },
        )
    }
}

#[async_trait]
impl DurableQueue for InMemoryQueue {
    async fn publish(&self, payload: &[u8]) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(QueueError::PublishFailed(
                "injected publish failure".to_string(),
            ));
        }
        state.published.push(payload.to_vec());
        if let Some(subscriber) = &state.subscriber {
            let _ = subscriber.send(payload.to_vec());
        }
        Ok(())
    }

    async fn consume(&self) -> Result<DeliveryStream, QueueError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock().unwrap();
            state.subscriber = Some(tx);
            state.subscriptions += 1;
        }
        let queue = self.clone();

        Ok(Box::pin(async_stream::stream! {
            while let Some(payload) = rx.recv().await {
                yield Ok(queue.delivery(payload));
            }
        }))
    }
}

#[async_trait]
impl ReceiptSubscriber for InMemoryQueue {
    async fn subscribe(&self) -> Result<DeliveryStream, QueueError> {
        self.consume().await
    }
}

/// Sender that records every notification it is asked to deliver and
/// answers from a script, then `Ok(())` once the script runs out.
#[derive(Debug, Clone)]
pub struct RecordingSender {
    name: String,
    script: Arc<Mutex<VecDeque<Result<(), SendError>>>>,
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingSender {
    /// Sender for channel tag `name` that always succeeds.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer the next attempts with `results`, in order.
    #[must_use]
    pub fn with_results(self, results: impl IntoIterator<Item = Result<(), SendError>>) -> Self {
        self.script.lock().unwrap().extend(results);
        self
    }

    /// Every notification passed to `send`, including failed attempts.
    #[must_use]
    pub fn attempts(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sender for RecordingSender {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> Result<(), SendError> {
        self.sent.lock().unwrap().push(notification.clone());
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

/// Receipt publisher that keeps receipts in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingReceiptPublisher {
    receipts: Arc<Mutex<Vec<NotificationReceipt>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingReceiptPublisher {
    /// Create a publisher that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every publish until reset.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    /// Receipts accepted so far.
    #[must_use]
    pub fn receipts(&self) -> Vec<NotificationReceipt> {
        self.receipts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReceiptPublisher for RecordingReceiptPublisher {
    async fn publish(&self, receipt: &NotificationReceipt) -> Result<(), PublishError> {
        if *self.failing.lock().unwrap() {
            return Err(PublishError::PublishFailed {
                topic: "notifications".to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.receipts.lock().unwrap().push(receipt.clone());
        Ok(())
    }
}
