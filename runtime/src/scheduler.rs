//! Scheduler loop: moves due notifications from the scheduling index onto
//! the durable queue.
//!
//! Every tick runs two independent passes, "due" then "retry". A pass pops
//! up to `batch_limit` ids scored at or before now and, for each id still
//! worth sending, marks the record Queued, persists it and publishes the
//! record JSON. Publish failures put the id back into the set it came from:
//!
//! | Set   | Re-added at            |
//! |-------|------------------------|
//! | due   | now                    |
//! | retry | now + `retry_republish_delay` (5 s) |
//!
//! Pop is not atomic with remove, so the same id can come back twice. The
//! status check on the stored record (and the consumer's own check) make
//! that harmless.
//!
//! # Example
//!
//! ```rust,ignore
//! let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//! let handle = Scheduler::new(store, index, queue, clock, shutdown_rx).spawn();
//!
//! // On shutdown
//! let _ = shutdown_tx.send(());
//! handle.await?;
//! ```

use crate::metrics::SchedulerMetrics;
use chrono::{DateTime, Utc};
use delayline_core::environment::Clock;
use delayline_core::notification::ScheduleSet;
use delayline_core::queue::DurableQueue;
use delayline_core::store::{NotificationStore, SchedulingIndex, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Interval between ticks.
    pub tick: Duration,
    /// Maximum ids popped per set per tick.
    pub batch_limit: usize,
    /// Delay applied when a retry-set publish fails.
    pub retry_republish_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            batch_limit: 100,
            retry_republish_delay: Duration::from_secs(5),
        }
    }
}

/// What one pass over a scheduling set did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Ids returned by the index.
    pub popped: usize,
    /// Records published to the queue.
    pub published: usize,
    /// Ids skipped: record missing, unreadable or already terminal.
    pub skipped: usize,
    /// Ids put back into the set after a persist or publish failure.
    pub requeued: usize,
}

/// Ticker-driven loop over the scheduling index.
pub struct Scheduler {
    store: Arc<dyn NotificationStore>,
    index: Arc<dyn SchedulingIndex>,
    queue: Arc<dyn DurableQueue>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    shutdown: broadcast::Receiver<()>,
}

impl Scheduler {
    /// Create a scheduler with the default configuration.
    #[must_use]
    pub fn new(
        store: Arc<dyn NotificationStore>,
        index: Arc<dyn SchedulingIndex>,
        queue: Arc<dyn DurableQueue>,
        clock: Arc<dyn Clock>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            store,
            index,
            queue,
            clock,
            config: SchedulerConfig::default(),
            shutdown,
        }
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the loop as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Tick until the shutdown signal fires. A tick in progress completes
    /// before the loop exits.
    pub async fn run(&mut self) {
        info!(
            component = "scheduler",
            tick_ms = self.config.tick.as_millis(),
            batch_limit = self.config.batch_limit,
            "Scheduler started"
        );

        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(component = "scheduler", "Scheduler received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!(component = "scheduler", "Scheduler stopped");
    }

    /// One tick: the "due" pass, then the "retry" pass, both against the
    /// same `now`.
    pub async fn tick(&self) {
        let now = self.clock.now();
        for set in ScheduleSet::ALL {
            match self.drain(set, now).await {
                Ok(report) if report.popped > 0 => {
                    debug!(
                        component = "scheduler",
                        set = %set,
                        popped = report.popped,
                        published = report.published,
                        skipped = report.skipped,
                        requeued = report.requeued,
                        "Scheduler pass finished"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(component = "scheduler", set = %set, error = %e, "Failed to read scheduling set");
                }
            }
        }
    }

    /// Pop and publish everything in `set` that is due at `now`, up to the
    /// batch limit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only when the index cannot be read. Per-id
    /// failures are logged and counted in the report.
    pub async fn drain(&self, set: ScheduleSet, now: DateTime<Utc>) -> Result<PassReport, StoreError> {
        let ids = self.index.pop_due(set, now, self.config.batch_limit).await?;
        let mut report = PassReport {
            popped: ids.len(),
            ..PassReport::default()
        };

        for id in ids {
            match self.promote(set, &id, now).await {
                Promotion::Published => report.published += 1,
                Promotion::Skipped => report.skipped += 1,
                Promotion::Requeued => report.requeued += 1,
            }
        }

        Ok(report)
    }

    async fn promote(&self, set: ScheduleSet, id: &str, now: DateTime<Utc>) -> Promotion {
        let mut notification = match self.store.get(id).await {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                warn!(component = "scheduler", set = %set, notification_id = %id, "Scheduled id has no record, treating as handled");
                return Promotion::Skipped;
            }
            Err(e) => {
                error!(component = "scheduler", set = %set, notification_id = %id, error = %e, "Failed to load notification");
                return Promotion::Skipped;
            }
        };

        if notification.status.is_terminal() {
            debug!(
                component = "scheduler",
                set = %set,
                notification_id = %id,
                status = %notification.status,
                "Skipping notification in terminal status"
            );
            return Promotion::Skipped;
        }

        notification.mark_queued(now);
        if let Err(e) = self.store.save(&notification).await {
            error!(component = "scheduler", set = %set, notification_id = %id, error = %e, "Failed to persist queued status");
            return self.requeue(set, id, now).await;
        }

        let payload = match notification.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!(component = "scheduler", notification_id = %id, error = %e, "Failed to encode notification");
                return Promotion::Skipped;
            }
        };

        match self.queue.publish(&payload).await {
            Ok(()) => {
                SchedulerMetrics::record_published(set.as_str());
                debug!(component = "scheduler", set = %set, notification_id = %id, "Notification published");
                Promotion::Published
            }
            Err(e) => {
                SchedulerMetrics::record_publish_failure(set.as_str());
                warn!(component = "scheduler", set = %set, notification_id = %id, error = %e, "Publish failed, re-enqueueing");
                self.requeue(set, id, now).await
            }
        }
    }

    async fn requeue(&self, set: ScheduleSet, id: &str, now: DateTime<Utc>) -> Promotion {
        let at = match set {
            ScheduleSet::Due => now,
            ScheduleSet::Retry => crate::offset(now, self.config.retry_republish_delay),
        };
        if let Err(e) = self.index.schedule(set, id, at).await {
            error!(
                component = "scheduler",
                set = %set,
                notification_id = %id,
                error = %e,
                "Failed to re-enqueue notification, it will not fire again until rescheduled"
            );
        }
        Promotion::Requeued
    }
}

enum Promotion {
    Published,
    Skipped,
    Requeued,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use delayline_core::notification::{
        Notification, NotificationRequest, NotificationStatus, epoch_score,
    };
    use delayline_testing::{FixedClock, InMemoryBackend, InMemoryQueue, test_clock};

    struct Harness {
        backend: InMemoryBackend,
        queue: InMemoryQueue,
        clock: FixedClock,
        scheduler: Scheduler,
        _shutdown: broadcast::Sender<()>,
    }

    fn harness() -> Harness {
        let backend = InMemoryBackend::new();
        let queue = InMemoryQueue::new();
        let clock = test_clock();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let scheduler = Scheduler::new(
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            Arc::new(queue.clone()),
            Arc::new(clock.clone()),
            shutdown_rx,
        );
        Harness {
            backend,
            queue,
            clock,
            scheduler,
            _shutdown: shutdown_tx,
        }
    }

    async fn schedule(h: &Harness, id: &str, send_at: DateTime<Utc>) -> Notification {
        let notification = Notification::scheduled(
            id,
            NotificationRequest {
                send_at: Some(send_at),
                channel: "telegram".to_string(),
                recipient: "111222333".to_string(),
                message: "hi".to_string(),
            },
            h.clock.now(),
        );
        h.backend.insert(notification.clone());
        h.backend
            .schedule(ScheduleSet::Due, id, send_at)
            .await
            .unwrap();
        notification
    }

    #[tokio::test]
    async fn due_notification_is_queued_and_published() {
        let h = harness();
        let now = h.clock.now();
        schedule(&h, "n1", now - ChronoDuration::seconds(1)).await;

        h.scheduler.tick().await;

        let published = h.queue.published_notifications();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, "n1");
        assert_eq!(published[0].status, NotificationStatus::Queued);
        assert_eq!(
            h.backend.record("n1").unwrap().status,
            NotificationStatus::Queued
        );
        assert!(h.backend.members(ScheduleSet::Due).is_empty());
    }

    #[tokio::test]
    async fn future_notification_waits_for_its_time() {
        let h = harness();
        let now = h.clock.now();
        schedule(&h, "n1", now + ChronoDuration::seconds(2)).await;

        h.scheduler.tick().await;
        assert!(h.queue.published().is_empty());

        h.clock.advance(ChronoDuration::seconds(2));
        h.scheduler.tick().await;
        assert_eq!(h.queue.published().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_and_missing_records_are_skipped() {
        let h = harness();
        let now = h.clock.now();
        let mut cancelled = schedule(&h, "cancelled", now).await;
        cancelled.cancel(now);
        h.backend.insert(cancelled);
        h.backend
            .schedule(ScheduleSet::Due, "ghost", now)
            .await
            .unwrap();

        let report = h.scheduler.drain(ScheduleSet::Due, now).await.unwrap();

        assert_eq!(report.popped, 2);
        assert_eq!(report.skipped, 2);
        assert!(h.queue.published().is_empty());
        assert_eq!(
            h.backend.record("cancelled").unwrap().status,
            NotificationStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn sent_record_is_never_requeued() {
        let h = harness();
        let now = h.clock.now();
        let mut sent = schedule(&h, "n1", now).await;
        sent.mark_sent(now);
        h.backend.insert(sent);

        h.scheduler.tick().await;

        assert!(h.queue.published().is_empty());
        assert_eq!(
            h.backend.record("n1").unwrap().status,
            NotificationStatus::Sent
        );
    }

    #[tokio::test]
    async fn due_publish_failure_reenqueues_at_now() {
        let h = harness();
        let now = h.clock.now();
        schedule(&h, "n1", now - ChronoDuration::seconds(30)).await;
        h.queue.fail_next_publishes(1);

        let report = h.scheduler.drain(ScheduleSet::Due, now).await.unwrap();

        assert_eq!(report.requeued, 1);
        assert_eq!(
            h.backend.score(ScheduleSet::Due, "n1"),
            Some(epoch_score(now))
        );
        assert_eq!(
            h.backend.record("n1").unwrap().status,
            NotificationStatus::Queued
        );

        // Next tick publishes it.
        h.scheduler.tick().await;
        assert_eq!(h.queue.published().len(), 1);
    }

    #[tokio::test]
    async fn retry_publish_failure_reenqueues_five_seconds_later() {
        let h = harness();
        let now = h.clock.now();
        let mut retrying = schedule(&h, "n1", now).await;
        h.backend.pop_due(ScheduleSet::Due, now, 10).await.unwrap();
        retrying.mark_retrying("boom", now, now);
        h.backend.insert(retrying);
        h.backend
            .schedule(ScheduleSet::Retry, "n1", now)
            .await
            .unwrap();
        h.queue.fail_next_publishes(1);

        h.scheduler.drain(ScheduleSet::Retry, now).await.unwrap();

        assert_eq!(
            h.backend.score(ScheduleSet::Retry, "n1"),
            Some(epoch_score(now) + 5)
        );
        assert!(h.backend.score(ScheduleSet::Due, "n1").is_none());
    }

    #[tokio::test]
    async fn retry_pass_queues_without_the_retry_time() {
        let h = harness();
        let now = h.clock.now();
        let mut retrying = schedule(&h, "n1", now).await;
        h.backend.pop_due(ScheduleSet::Due, now, 10).await.unwrap();
        retrying.mark_retrying("boom", now, now);
        h.backend.insert(retrying);
        h.backend
            .schedule(ScheduleSet::Retry, "n1", now)
            .await
            .unwrap();

        h.scheduler.drain(ScheduleSet::Retry, now).await.unwrap();

        let stored = h.backend.record("n1").unwrap();
        assert_eq!(stored.status, NotificationStatus::Queued);
        assert_eq!(stored.retry_count, 1);
        assert!(stored.next_attempt_at.is_none());
        let published = h.queue.published_notifications();
        assert_eq!(published.len(), 1);
        assert!(published[0].next_attempt_at.is_none());
    }

    #[tokio::test]
    async fn persist_failure_reenqueues_without_publishing() {
        let h = harness();
        let now = h.clock.now();
        schedule(&h, "n1", now).await;
        h.backend.fail_next_saves(1);

        let report = h.scheduler.drain(ScheduleSet::Due, now).await.unwrap();

        assert_eq!(report.requeued, 1);
        assert!(h.queue.published().is_empty());
        assert!(h.backend.score(ScheduleSet::Due, "n1").is_some());
    }

    #[tokio::test]
    async fn batch_limit_bounds_one_pass_and_earliest_go_first() {
        let h = harness();
        let now = h.clock.now();
        for i in 0..5 {
            schedule(&h, &format!("n{i}"), now - ChronoDuration::seconds(10 - i)).await;
        }
        let scheduler = {
            let (_tx, rx) = broadcast::channel(1);
            Scheduler::new(
                Arc::new(h.backend.clone()),
                Arc::new(h.backend.clone()),
                Arc::new(h.queue.clone()),
                Arc::new(h.clock.clone()),
                rx,
            )
            .with_config(SchedulerConfig {
                batch_limit: 3,
                ..SchedulerConfig::default()
            })
        };

        let report = scheduler.drain(ScheduleSet::Due, now).await.unwrap();

        assert_eq!(report.published, 3);
        let ids: Vec<String> = h
            .queue
            .published_notifications()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec!["n0", "n1", "n2"]);
        assert_eq!(h.backend.members(ScheduleSet::Due), vec!["n3", "n4"]);
    }

    #[tokio::test]
    async fn index_read_failure_is_reported() {
        let h = harness();
        h.backend.fail_pops(true);
        let result = h.scheduler.drain(ScheduleSet::Due, h.clock.now()).await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }

    #[tokio::test]
    async fn run_exits_on_shutdown() {
        let backend = InMemoryBackend::new();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = Scheduler::new(
            Arc::new(backend.clone()),
            Arc::new(backend),
            Arc::new(InMemoryQueue::new()),
            Arc::new(test_clock()),
            shutdown_rx,
        )
        .with_config(SchedulerConfig {
            tick: Duration::from_millis(10),
            ..SchedulerConfig::default()
        })
        .spawn();

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
