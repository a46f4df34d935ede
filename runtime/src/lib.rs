//! # Delayline Runtime
//!
//! The long-running halves of the notifier:
//!
//! - [`scheduler::Scheduler`] moves ids whose time has come from the
//!   scheduling index onto the durable queue.
//! - [`consumer::ConsumerWorker`] drains the queue, calls the channel sender
//!   and records the outcome.
//!
//! Plus the pieces both depend on: [`retry`] (backoff policies),
//! [`registry`] (channel tag to sender) and [`metrics`], and the YAML
//! [`config`] loader the service binaries share.
//!
//! Both loops take a `tokio::sync::broadcast::Receiver<()>` and exit when it
//! fires, finishing the unit of work in hand first.

#![forbid(unsafe_code)]

pub mod config;
pub mod consumer;
pub mod metrics;
pub mod registry;
pub mod retry;
pub mod scheduler;

pub use consumer::{ConsumerConfig, ConsumerWorker, Outcome};
pub use registry::SenderRegistry;
pub use scheduler::{PassReport, Scheduler, SchedulerConfig};

use chrono::{DateTime, Utc};
use std::time::Duration;

/// `now + delay`, saturating at the largest representable time.
#[must_use]
pub fn offset(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
