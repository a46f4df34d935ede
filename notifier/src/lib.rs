//! Delayed notification service.
//!
//! Accepts notifications over HTTP, keeps them in Redis until they are due,
//! hands them to RabbitMQ and delivers them through Telegram, retrying with
//! exponential backoff. Terminal outcomes can be published to Kafka as
//! receipts.

#![forbid(unsafe_code)]

pub mod api;
pub mod app;
pub mod config;
pub mod service;
pub mod telegram;

pub use app::Application;
pub use config::Config;
pub use service::{CancelOutcome, NotificationService, ServiceError};
pub use telegram::TelegramSender;
