//! # Delayline Testing
//!
//! In-memory implementations of every port in `delayline-core`, for tests
//! that exercise the scheduler, consumer and booking use cases without
//! Redis, `RabbitMQ`, Kafka or Postgres.
//!
//! ## Example
//!
//! ```ignore
//! use delayline_testing::{InMemoryBackend, InMemoryQueue, test_clock};
//!
//! #[tokio::test]
//! async fn due_notification_is_published() {
//!     let backend = InMemoryBackend::new();
//!     let queue = InMemoryQueue::new();
//!     let clock = test_clock();
//!     // ... build a Scheduler over them and call tick()
//! }
//! ```

use chrono::{DateTime, Utc};
use delayline_core::environment::Clock;

mod booker_mocks;
mod notifier_mocks;

pub use booker_mocks::{InMemoryTransactionManager, MockNotifierClient};
pub use notifier_mocks::{
    InMemoryBackend, InMemoryQueue, RecordingReceiptPublisher, RecordingSender, Settlement,
};

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, RwLock};

    pub use crate::booker_mocks::{InMemoryTransactionManager, MockNotifierClient};
    pub use crate::notifier_mocks::{
        InMemoryBackend, InMemoryQueue, RecordingReceiptPublisher, RecordingSender, Settlement,
    };

    /// Manually driven clock for deterministic tests.
    ///
    /// Returns the same instant until [`FixedClock::advance`] or
    /// [`FixedClock::set`] moves it. Clones share the same time.
    ///
    /// # Example
    ///
    /// ```
    /// use delayline_testing::mocks::FixedClock;
    /// use delayline_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let before = clock.now();
    /// assert_eq!(before, clock.now());
    ///
    /// clock.advance(Duration::seconds(5));
    /// assert_eq!(clock.now() - before, Duration::seconds(5));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock at the given time.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward.
        #[allow(clippy::unwrap_used)] // Test helper
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap();
            *time += by;
        }

        /// Jump to an absolute time.
        #[allow(clippy::unwrap_used)] // Test helper
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.write().unwrap() = to;
        }
    }

    impl Clock for FixedClock {
        #[allow(clippy::unwrap_used)] // Test helper
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }
}

pub use mocks::FixedClock;

/// Clock fixed at 2025-01-01T00:00:00Z.
///
/// # Panics
///
/// Never in practice; the timestamp literal is valid.
#[must_use]
#[allow(clippy::expect_used)] // Test helper with a hard-coded valid timestamp
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("valid test timestamp")
            .with_timezone(&Utc),
    )
}
