//! In-memory booking store and notifier client.

#![allow(clippy::unwrap_used)] // Test infrastructure

use async_trait::async_trait;
use delayline_core::booking::{Booking, Event};
use delayline_core::notification::{Notification, NotificationRequest};
use delayline_core::notifier_client::{NotifierClient, NotifierClientError};
use delayline_core::repository::{BookingRepository, RepositoryError, TransactionManager};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
struct BookingState {
    events: HashMap<String, Event>,
    bookings: HashMap<String, Booking>,
    corrupt_bookings: HashSet<String>,
}

/// Repository over a private snapshot of the state. Changes become visible
/// only if the transaction commits.
#[derive(Debug)]
struct SnapshotRepository {
    state: BookingState,
}

#[async_trait]
impl BookingRepository for SnapshotRepository {
    async fn create_event(&mut self, event: &Event) -> Result<(), RepositoryError> {
        if self.state.events.contains_key(&event.id) {
            return Err(RepositoryError::Database(format!(
                "duplicate event id {}",
                event.id
            )));
        }
        self.state.events.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn get_event(&mut self, id: &str) -> Result<Option<Event>, RepositoryError> {
        Ok(self.state.events.get(id).cloned())
    }

    async fn update_event_available(
        &mut self,
        id: &str,
        available: i64,
    ) -> Result<(), RepositoryError> {
        let event = self
            .state
            .events
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "event",
                id: id.to_string(),
            })?;
        event.available = available;
        Ok(())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), RepositoryError> {
        self.state
            .bookings
            .insert(booking.id.clone(), booking.clone());
        Ok(())
    }

    async fn get_booking(&mut self, id: &str) -> Result<Option<Booking>, RepositoryError> {
        if self.state.corrupt_bookings.contains(id) {
            return Err(RepositoryError::CorruptState(format!(
                "booking {id} has unknown status"
            )));
        }
        Ok(self.state.bookings.get(id).cloned())
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<(), RepositoryError> {
        match self.state.bookings.get_mut(&booking.id) {
            Some(stored) => {
                *stored = booking.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound {
                entity: "booking",
                id: booking.id.clone(),
            }),
        }
    }
}

/// Transaction manager over an in-memory snapshot.
///
/// Transactions are serialized. Each one works on a copy of the state that
/// replaces the shared state only when the closure returns `Ok` and no commit
/// failure is injected.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransactionManager {
    state: Arc<tokio::sync::Mutex<BookingState>>,
    failing_commits: Arc<AtomicUsize>,
    commits: Arc<AtomicUsize>,
}

impl InMemoryTransactionManager {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an event outside any transaction.
    pub async fn insert_event(&self, event: Event) {
        self.state
            .lock()
            .await
            .events
            .insert(event.id.clone(), event);
    }

    /// Seed a booking outside any transaction.
    pub async fn insert_booking(&self, booking: Booking) {
        self.state
            .lock()
            .await
            .bookings
            .insert(booking.id.clone(), booking);
    }

    /// Make `get_booking(id)` report an unknown stored status.
    pub async fn corrupt_booking(&self, id: &str) {
        self.state
            .lock()
            .await
            .corrupt_bookings
            .insert(id.to_string());
    }

    /// Committed event, if any.
    pub async fn event(&self, id: &str) -> Option<Event> {
        self.state.lock().await.events.get(id).cloned()
    }

    /// Committed booking, if any.
    pub async fn booking(&self, id: &str) -> Option<Booking> {
        self.state.lock().await.bookings.get(id).cloned()
    }

    /// All committed bookings.
    pub async fn bookings(&self) -> Vec<Booking> {
        self.state.lock().await.bookings.values().cloned().collect()
    }

    /// Fail the next `count` commits with a database error.
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Number of committed transactions.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

impl TransactionManager for InMemoryTransactionManager {
    fn transaction<'a, T, E, F>(&'a self, work: F) -> BoxFuture<'a, Result<T, E>>
    where
        T: Send + 'a,
        E: From<RepositoryError> + Send + 'a,
        F: for<'t> FnOnce(&'t mut dyn BookingRepository) -> BoxFuture<'t, Result<T, E>>
            + Send
            + 'a,
    {
        Box::pin(async move {
            let mut shared = self.state.lock().await;
            let mut repo = SnapshotRepository {
                state: shared.clone(),
            };

            let value = work(&mut repo).await?;

            let injected = self
                .failing_commits
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(E::from(RepositoryError::Database(
                    "injected commit failure".to_string(),
                )));
            }

            *shared = repo.state;
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        })
    }
}

#[derive(Debug, Default)]
struct ClientState {
    scheduled: Vec<NotificationRequest>,
    cancelled: Vec<String>,
    fail_schedule: bool,
    fail_cancel: bool,
}

/// Notifier client that records calls and returns ids `notif-1`, `notif-2`, ...
#[derive(Debug, Clone, Default)]
pub struct MockNotifierClient {
    state: Arc<Mutex<ClientState>>,
}

impl MockNotifierClient {
    /// Client where every call succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `schedule` fail until reset.
    pub fn set_schedule_failing(&self, failing: bool) {
        self.state.lock().unwrap().fail_schedule = failing;
    }

    /// Make `cancel` fail until reset.
    pub fn set_cancel_failing(&self, failing: bool) {
        self.state.lock().unwrap().fail_cancel = failing;
    }

    /// Requests passed to `schedule`, including failed ones.
    #[must_use]
    pub fn scheduled(&self) -> Vec<NotificationRequest> {
        self.state.lock().unwrap().scheduled.clone()
    }

    /// Ids passed to `cancel`, including failed ones.
    #[must_use]
    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }
}

#[async_trait]
impl NotifierClient for MockNotifierClient {
    async fn schedule(
        &self,
        request: &NotificationRequest,
    ) -> Result<Notification, NotifierClientError> {
        let mut state = self.state.lock().unwrap();
        state.scheduled.push(request.clone());
        if state.fail_schedule {
            return Err(NotifierClientError::Transport(
                "connection refused".to_string(),
            ));
        }
        let id = format!("notif-{}", state.scheduled.len());
        let created_at = request.send_at.unwrap_or_default();
        Ok(Notification::scheduled(id, request.clone(), created_at))
    }

    async fn cancel(&self, id: &str) -> Result<(), NotifierClientError> {
        let mut state = self.state.lock().unwrap();
        state.cancelled.push(id.to_string());
        if state.fail_cancel {
            return Err(NotifierClientError::Status {
                status: 500,
                message: "internal".to_string(),
            });
        }
        Ok(())
    }
}
