//! Prometheus metrics for the scheduler, consumer and booking flows.
//!
//! [`MetricsServer::start`] installs a global recorder; the HTTP services
//! expose its rendering at `GET /metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use delayline_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new();
//! server.start()?;
//! let body = server.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Owner of the Prometheus recorder handle.
#[derive(Default)]
pub struct MetricsServer {
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create an uninstalled metrics server.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder
    /// that is already installed (tests) is tolerated with a warning.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "delayline_scheduler_published_total",
        "Notifications published to the durable queue, by scheduling set"
    );
    describe_counter!(
        "delayline_scheduler_publish_failures_total",
        "Publish failures that re-enqueued a notification, by scheduling set"
    );
    describe_counter!(
        "delayline_consumer_outcomes_total",
        "Deliveries handled by the consumer, by outcome"
    );
    describe_histogram!(
        "delayline_send_duration_seconds",
        "Time spent in a channel sender"
    );
    describe_counter!(
        "delayline_bookings_total",
        "Booking operations, by operation and result"
    );
    describe_counter!(
        "delayline_cancellation_events_total",
        "Cancellation events handled, by result"
    );
}

/// Scheduler metrics recorder.
pub struct SchedulerMetrics;

impl SchedulerMetrics {
    /// Record a successful publish from `set`.
    pub fn record_published(set: &'static str) {
        counter!("delayline_scheduler_published_total", "set" => set).increment(1);
    }

    /// Record a publish failure from `set`.
    pub fn record_publish_failure(set: &'static str) {
        counter!("delayline_scheduler_publish_failures_total", "set" => set).increment(1);
    }
}

/// Consumer metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record how a delivery was settled.
    pub fn record_outcome(outcome: &'static str) {
        counter!("delayline_consumer_outcomes_total", "outcome" => outcome).increment(1);
    }

    /// Record time spent in a sender.
    pub fn record_send(channel: &str, duration: Duration) {
        histogram!("delayline_send_duration_seconds", "channel" => channel.to_string())
            .record(duration.as_secs_f64());
    }
}

/// Booking metrics recorder.
pub struct BookingMetrics;

impl BookingMetrics {
    /// Record a booking operation.
    pub fn record_operation(operation: &'static str, result: &'static str) {
        counter!("delayline_bookings_total", "operation" => operation, "result" => result)
            .increment(1);
    }

    /// Record a handled cancellation event.
    pub fn record_cancellation_event(result: &'static str) {
        counter!("delayline_cancellation_events_total", "result" => result).increment(1);
    }
}
