//! HTTP API.
//!
//! | Verb | Path | Success |
//! |---|---|---|
//! | POST | `/notify` | `202` + notification |
//! | GET | `/notify/:id` | `200` + notification, `404` if unknown |
//! | DELETE | `/notify/:id` | `204`, also for unknown or terminal ids |
//! | GET | `/health` | `200` |
//! | GET | `/metrics` | Prometheus text, `404` when disabled |

use crate::service::{NotificationService, ServiceError};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
};
use delayline_core::notification::{Notification, NotificationRequest};
use delayline_runtime::metrics::MetricsServer;
use delayline_web::{AppError, JsonBody, WebResult, correlation_id_layer, handlers};
use std::sync::Arc;

/// State shared by the handlers.
#[derive(Clone)]
pub struct AppState {
    /// Notification operations.
    pub service: NotificationService,
    /// Recorder rendered at `/metrics`; `None` when metrics are disabled.
    pub metrics: Option<Arc<MetricsServer>>,
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/notify", post(create_notification))
        .route(
            "/notify/:id",
            get(get_notification).delete(cancel_notification),
        )
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(metrics))
        .layer(correlation_id_layer())
        .with_state(state)
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(e) => Self::bad_request(e.to_string()),
            ServiceError::Store(e) => {
                Self::internal(format!("failed to store notification: {e}")).with_source(e)
            }
        }
    }
}

async fn create_notification(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<NotificationRequest>,
) -> WebResult<(StatusCode, Json<Notification>)> {
    let notification = state.service.create(request).await?;
    Ok((StatusCode::ACCEPTED, Json(notification)))
}

async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> WebResult<Json<Notification>> {
    state
        .service
        .get(&id)
        .await
        .map_err(|e| AppError::internal(format!("failed to load notification: {e}")).with_source(e))?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("notification {id} not found")))
}

async fn cancel_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> WebResult<StatusCode> {
    state.service.cancel(&id).await.map_err(|e| {
        AppError::internal(format!("failed to cancel notification: {e}")).with_source(e)
    })?;
    Ok(StatusCode::NO_CONTENT)
}

async fn metrics(State(state): State<AppState>) -> Response {
    handlers::render_metrics(state.metrics.as_deref())
}
