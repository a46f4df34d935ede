//! Create, read and cancel notifications.
//!
//! The service writes the record first and then indexes it, so a crash in
//! between leaves a Scheduled record that never fires rather than an index
//! entry pointing at nothing.

use chrono::{DateTime, Utc};
use delayline_core::channel::{ValidationError, validate_request};
use delayline_core::environment::Clock;
use delayline_core::notification::{Notification, NotificationRequest, ScheduleSet};
use delayline_core::store::{NotificationStore, SchedulingIndex, StoreError};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors from [`NotificationService`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The request was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The store or index failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What [`NotificationService::cancel`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Moved to Cancelled and removed from both scheduling sets.
    Cancelled,
    /// Already Sent, Failed or Cancelled; nothing changed.
    AlreadyTerminal,
    /// No such notification.
    NotFound,
}

/// Ingress side of the notifier.
#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    index: Arc<dyn SchedulingIndex>,
    clock: Arc<dyn Clock>,
}

impl NotificationService {
    /// Create a service over the given ports.
    #[must_use]
    pub fn new(
        store: Arc<dyn NotificationStore>,
        index: Arc<dyn SchedulingIndex>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            index,
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Validate, persist as Scheduled and add to the due set.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Validation`] for a bad request, [`ServiceError::Store`]
    /// if either write fails.
    pub async fn create(&self, request: NotificationRequest) -> Result<Notification, ServiceError> {
        validate_request(&request)?;

        let notification =
            Notification::scheduled(Uuid::new_v4().to_string(), request, self.now());

        self.store.save(&notification).await?;
        if let Err(e) = self
            .index
            .schedule(ScheduleSet::Due, &notification.id, notification.send_at)
            .await
        {
            tracing::error!(
                notification_id = %notification.id,
                error = %e,
                "Notification stored but not scheduled"
            );
            return Err(e.into());
        }

        tracing::info!(
            notification_id = %notification.id,
            channel = %notification.channel,
            send_at = %notification.send_at,
            "Notification scheduled"
        );
        Ok(notification)
    }

    /// Load a notification.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    pub async fn get(&self, id: &str) -> Result<Option<Notification>, StoreError> {
        self.store.get(id).await
    }

    /// Cancel a notification. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read or the atomic save-and-unschedule
    /// fails.
    pub async fn cancel(&self, id: &str) -> Result<CancelOutcome, StoreError> {
        let Some(mut notification) = self.store.get(id).await? else {
            tracing::debug!(notification_id = %id, "Cancel of unknown notification ignored");
            return Ok(CancelOutcome::NotFound);
        };

        if !notification.cancel(self.now()) {
            tracing::debug!(
                notification_id = %id,
                status = %notification.status,
                "Cancel of terminal notification ignored"
            );
            return Ok(CancelOutcome::AlreadyTerminal);
        }

        self.index.save_and_unschedule(&notification).await?;
        tracing::info!(notification_id = %id, "Notification cancelled");
        Ok(CancelOutcome::Cancelled)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use delayline_core::notification::NotificationStatus;
    use delayline_testing::{FixedClock, InMemoryBackend, test_clock};

    fn service() -> (NotificationService, InMemoryBackend, FixedClock) {
        let backend = InMemoryBackend::new();
        let clock = test_clock();
        let service = NotificationService::new(
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            Arc::new(clock.clone()),
        );
        (service, backend, clock)
    }

    fn request(send_at: Option<DateTime<Utc>>) -> NotificationRequest {
        NotificationRequest {
            send_at,
            channel: "telegram".to_string(),
            recipient: "111222333".to_string(),
            message: "hi".to_string(),
        }
    }

    #[tokio::test]
    async fn create_stores_and_indexes_as_due() {
        let (service, backend, clock) = service();
        let send_at = clock.now() + chrono::Duration::seconds(30);

        let created = service.create(request(Some(send_at))).await.unwrap();

        assert!(Uuid::parse_str(&created.id).is_ok());
        assert_eq!(created.status, NotificationStatus::Scheduled);
        assert_eq!(created.retry_count, 0);
        assert_eq!(backend.record(&created.id), Some(created.clone()));
        assert_eq!(
            backend.score(ScheduleSet::Due, &created.id),
            Some(send_at.timestamp())
        );
    }

    #[tokio::test]
    async fn missing_send_at_means_now() {
        let (service, _, clock) = service();
        let created = service.create(request(None)).await.unwrap();
        assert_eq!(created.send_at, clock.now());
    }

    #[tokio::test]
    async fn invalid_request_writes_nothing() {
        let (service, backend, _) = service();
        let mut bad = request(None);
        bad.recipient = "12345".to_string();

        let err = service.create(bad).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::InvalidRecipient(_))));
        assert!(backend.members(ScheduleSet::Due).is_empty());
    }

    #[tokio::test]
    async fn store_failure_is_reported() {
        let (service, backend, _) = service();
        backend.fail_next_saves(1);
        assert!(matches!(
            service.create(request(None)).await,
            Err(ServiceError::Store(_))
        ));
        assert!(backend.members(ScheduleSet::Due).is_empty());
    }

    #[tokio::test]
    async fn cancel_removes_from_both_sets() {
        let (service, backend, clock) = service();
        let created = service.create(request(None)).await.unwrap();
        backend
            .schedule(ScheduleSet::Retry, &created.id, clock.now())
            .await
            .unwrap();

        assert_eq!(service.cancel(&created.id).await.unwrap(), CancelOutcome::Cancelled);

        assert_eq!(
            backend.record(&created.id).unwrap().status,
            NotificationStatus::Cancelled
        );
        assert!(backend.score(ScheduleSet::Due, &created.id).is_none());
        assert!(backend.score(ScheduleSet::Retry, &created.id).is_none());
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let (service, backend, _) = service();
        let created = service.create(request(None)).await.unwrap();

        assert_eq!(service.cancel(&created.id).await.unwrap(), CancelOutcome::Cancelled);
        let after_first = backend.record(&created.id).unwrap();
        assert_eq!(
            service.cancel(&created.id).await.unwrap(),
            CancelOutcome::AlreadyTerminal
        );
        assert_eq!(backend.record(&created.id).unwrap(), after_first);
        assert_eq!(service.cancel("missing").await.unwrap(), CancelOutcome::NotFound);
    }

    #[tokio::test]
    async fn cancel_leaves_sent_and_failed_alone() {
        let (service, backend, clock) = service();
        let mut sent = Notification::scheduled("sent", request(None), clock.now());
        sent.mark_sent(clock.now());
        let mut failed = Notification::scheduled("failed", request(None), clock.now());
        failed.mark_failed("unsupported channel: sms", clock.now());
        backend.insert(sent.clone());
        backend.insert(failed.clone());

        assert_eq!(service.cancel("sent").await.unwrap(), CancelOutcome::AlreadyTerminal);
        assert_eq!(service.cancel("failed").await.unwrap(), CancelOutcome::AlreadyTerminal);
        assert_eq!(backend.record("sent"), Some(sent));
        assert_eq!(backend.record("failed"), Some(failed));
    }
}
