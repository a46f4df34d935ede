//! Axum plumbing shared by the notifier and booker HTTP services.
//!
//! - [`AppError`] renders every failure as `{"error": "<message>"}` with the
//!   matching status code and logs server errors with their source.
//! - [`JsonBody`] is a `Json` extractor whose rejections are [`AppError`]s.
//! - [`correlation_id_layer`] runs each request inside an `http_request` span
//!   tagged with an `X-Correlation-ID`, generated when the client sent none.
//! - [`handlers`] holds the `/health` and `/metrics` endpoints.
//! - [`server`] binds the listeners, serves until shutdown and waits for
//!   SIGINT/SIGTERM.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use delayline_web::{correlation_id_layer, handlers};
//!
//! let app = Router::new()
//!     .route("/health", get(handlers::health_check))
//!     .layer(correlation_id_layer());
//! ```

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use error::AppError;
pub use extractors::JsonBody;
pub use middleware::{CORRELATION_ID_HEADER, CorrelationIdExt, correlation_id_layer};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
