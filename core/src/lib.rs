//! # Delayline Core
//!
//! Domain types and port traits shared by the notifier and booker services.
//!
//! The crate is split along the two halves of the pipeline:
//!
//! ```text
//! ┌───────────────────────────┐      POST /notify      ┌───────────────────────────┐
//! │          Booker           │ ─────────────────────▶ │         Notifier          │
//! │  Book / Confirm / Cancel  │ ◀───────────────────── │  store + index + queue    │
//! │  (transactional store)    │   receipts (Kafka)     │  scheduler + consumer     │
//! └───────────────────────────┘                        └───────────────────────────┘
//! ```
//!
//! - [`notification`]: the notification record, its status machine and the
//!   scheduling sets it moves between.
//! - [`booking`]: events, bookings and the cancellation message template.
//! - [`channel`]: per-channel recipient validation.
//! - [`store`], [`queue`], [`sender`], [`receipt`]: notifier-side ports.
//! - [`notifier_client`], [`repository`]: booker-side ports.
//!
//! Every port is a trait so the runtime loops and use cases can be exercised
//! against the in-memory implementations in `delayline-testing`.

#![forbid(unsafe_code)]

pub mod booking;
pub mod channel;
pub mod notification;
pub mod notifier_client;
pub mod queue;
pub mod receipt;
pub mod repository;
pub mod sender;
pub mod store;

// Re-export commonly used external types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

/// Environment module - injectable dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Every component that stamps records or compares deadlines takes a
    /// clock instead of calling `Utc::now()` directly.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock implementation backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
