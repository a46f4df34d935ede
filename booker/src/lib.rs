//! Event booking service.
//!
//! Bookings hold a seat only while their payment deadline is armed in the
//! notifier. A deadline that fires comes back as a receipt on Kafka and
//! cancels the booking; confirming in time disarms it.

#![forbid(unsafe_code)]

pub mod api;
pub mod app;
pub mod config;
pub mod consumer;
pub mod error;
pub mod notifier_client;
pub mod service;

pub use app::Application;
pub use config::Config;
pub use consumer::{CancellationConsumer, CancellationOutcome};
pub use error::BookingError;
pub use notifier_client::HttpNotifierClient;
pub use service::{BookingService, NewEvent};
