//! Health and metrics endpoints.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use delayline_runtime::metrics::MetricsServer;
use serde_json::{Value, json};

/// `GET /health`: liveness only, dependencies are not probed.
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// Body for `GET /metrics`: the Prometheus text rendering, or 404 when no
/// recorder is installed.
#[must_use]
pub fn render_metrics(metrics: Option<&MetricsServer>) -> Response {
    match metrics.and_then(MetricsServer::render) {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "metrics disabled"}))).into_response(),
    }
}
