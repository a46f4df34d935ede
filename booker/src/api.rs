//! HTTP API.
//!
//! | Verb | Path | Body | Success |
//! |---|---|---|---|
//! | POST | `/events` | `{name, capacity, date, payment_ttl}` | `201` + event |
//! | GET | `/events/:id` | | `200` + event |
//! | POST | `/events/:id/book` | `{user_id}` | `201` + `{id, status, payment_deadline}` |
//! | POST | `/events/:id/confirm` | `{booking_id}` | `200` + `{status}` |
//! | POST | `/events/:id/cancel` | `{booking_id}` | `200` + `{status}` |
//! | GET | `/health` | | `200` |
//! | GET | `/metrics` | | Prometheus text, `404` when disabled |
//!
//! Unknown events and bookings answer `404`, malformed input `400`, refused
//! state transitions `409` and store failures `500`.

use crate::error::BookingError;
use crate::service::{BookingService, NewEvent};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use delayline_core::booking::{BookingStatus, Event};
use delayline_core::repository::TransactionManager;
use delayline_runtime::metrics::MetricsServer;
use delayline_web::{AppError, JsonBody, WebResult, correlation_id_layer, handlers};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// State shared by the handlers.
pub struct AppState<M> {
    /// Booking operations.
    pub service: BookingService<M>,
    /// Recorder rendered at `/metrics`; `None` when metrics are disabled.
    pub metrics: Option<Arc<MetricsServer>>,
}

impl<M: Clone> Clone for AppState<M> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Body of `POST /events/:id/book`.
#[derive(Debug, Deserialize)]
pub struct BookRequest {
    /// Telegram chat id of the user.
    pub user_id: String,
}

/// Answer to `POST /events/:id/book`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookResponse {
    /// Booking id.
    pub id: String,
    /// Always `pending`.
    pub status: BookingStatus,
    /// Confirm before this instant.
    pub payment_deadline: DateTime<Utc>,
}

/// Body of `POST /events/:id/confirm` and `POST /events/:id/cancel`.
#[derive(Debug, Deserialize)]
pub struct BookingRef {
    /// Booking id.
    pub booking_id: String,
}

/// Answer to confirm and cancel.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    /// New booking status.
    pub status: BookingStatus,
}

/// Build the router.
pub fn router<M>(state: AppState<M>) -> Router
where
    M: TransactionManager + Clone + 'static,
{
    Router::new()
        .route("/events", post(create_event::<M>))
        .route("/events/:id", get(get_event::<M>))
        .route("/events/:id/book", post(book::<M>))
        .route("/events/:id/confirm", post(confirm::<M>))
        .route("/events/:id/cancel", post(cancel::<M>))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(metrics::<M>))
        .layer(correlation_id_layer())
        .with_state(state)
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        err.abort_if_corrupt();
        let message = err.to_string();
        match err {
            BookingError::Validation { .. } | BookingError::EventMismatch { .. } => {
                Self::bad_request(message)
            }
            BookingError::EventNotFound(_) | BookingError::BookingNotFound(_) => {
                Self::not_found(message)
            }
            BookingError::EventPassed(_)
            | BookingError::SoldOut(_)
            | BookingError::AlreadyCancelled(_)
            | BookingError::InvalidStatus { .. }
            | BookingError::DeadlinePassed(_) => Self::conflict(message),
            BookingError::Repository(e) => Self::internal(format!("booking store failure: {e}")).with_source(e),
        }
    }
}

fn require_id(field: &'static str, value: &str) -> WebResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::bad_request(format!("invalid {field}: must not be empty")));
    }
    Ok(())
}

async fn create_event<M: TransactionManager>(
    State(state): State<AppState<M>>,
    JsonBody(new_event): JsonBody<NewEvent>,
) -> WebResult<(StatusCode, Json<Event>)> {
    let event = state.service.create_event(new_event).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn get_event<M: TransactionManager>(
    State(state): State<AppState<M>>,
    Path(event_id): Path<String>,
) -> WebResult<Json<Event>> {
    Ok(Json(state.service.get_event(&event_id).await?))
}

async fn book<M: TransactionManager>(
    State(state): State<AppState<M>>,
    Path(event_id): Path<String>,
    JsonBody(request): JsonBody<BookRequest>,
) -> WebResult<(StatusCode, Json<BookResponse>)> {
    let booking = state.service.book(&event_id, &request.user_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(BookResponse {
            id: booking.id,
            status: booking.status,
            payment_deadline: booking.payment_deadline,
        }),
    ))
}

async fn confirm<M: TransactionManager>(
    State(state): State<AppState<M>>,
    Path(event_id): Path<String>,
    JsonBody(request): JsonBody<BookingRef>,
) -> WebResult<Json<StatusResponse>> {
    require_id("booking_id", &request.booking_id)?;
    let booking = state.service.confirm(&event_id, &request.booking_id).await?;
    Ok(Json(StatusResponse {
        status: booking.status,
    }))
}

async fn cancel<M: TransactionManager>(
    State(state): State<AppState<M>>,
    Path(event_id): Path<String>,
    JsonBody(request): JsonBody<BookingRef>,
) -> WebResult<Json<StatusResponse>> {
    require_id("booking_id", &request.booking_id)?;
    let booking = state
        .service
        .cancel_by_user(&event_id, &request.booking_id)
        .await?;
    Ok(Json(StatusResponse {
        status: booking.status,
    }))
}

async fn metrics<M>(State(state): State<AppState<M>>) -> Response {
    handlers::render_metrics(state.metrics.as_deref())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use delayline_testing::{InMemoryTransactionManager, MockNotifierClient, test_clock};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app() -> (Router, InMemoryTransactionManager, MockNotifierClient) {
        let store = InMemoryTransactionManager::new();
        let notifier = MockNotifierClient::new();
        let service = BookingService::new(
            store.clone(),
            Arc::new(notifier.clone()),
            Arc::new(test_clock()),
        );
        let app = router(AppState {
            service,
            metrics: None,
        });
        (app, store, notifier)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create_event(app: &Router, capacity: i64) -> String {
        let (status, body) = call(
            app,
            "POST",
            "/events",
            Some(json!({
                "name": "Concert",
                "capacity": capacity,
                "date": "2025-02-01T19:00:00Z",
                "payment_ttl": 900,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn event_lifecycle_over_http() {
        let (app, _, _) = app();
        let event_id = create_event(&app, 2).await;

        let (status, body) = call(&app, "GET", &format!("/events/{event_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["available"], 2);
        assert_eq!(body["payment_ttl"], 900);

        let (status, body) = call(
            &app,
            "POST",
            &format!("/events/{event_id}/book"),
            Some(json!({"user_id": "123456789"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["payment_deadline"], "2025-01-01T00:15:00Z");
        let booking_id = body["id"].as_str().unwrap().to_string();

        let (_, body) = call(&app, "GET", &format!("/events/{event_id}"), None).await;
        assert_eq!(body["available"], 1);

        let (status, body) = call(
            &app,
            "POST",
            &format!("/events/{event_id}/confirm"),
            Some(json!({"booking_id": booking_id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "confirmed"}));
    }

    #[tokio::test]
    async fn cancel_over_http_releases_the_seat() {
        let (app, store, notifier) = app();
        let event_id = create_event(&app, 1).await;
        let (_, body) = call(
            &app,
            "POST",
            &format!("/events/{event_id}/book"),
            Some(json!({"user_id": "123456789"})),
        )
        .await;
        let booking_id = body["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            "POST",
            &format!("/events/{event_id}/cancel"),
            Some(json!({"booking_id": booking_id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "cancelled"}));
        assert_eq!(store.event(&event_id).await.unwrap().available, 1);
        assert_eq!(notifier.cancelled(), vec!["notif-1".to_string()]);

        let (status, body) = call(
            &app,
            "POST",
            &format!("/events/{event_id}/cancel"),
            Some(json!({"booking_id": booking_id})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("already cancelled"));
    }

    #[tokio::test]
    async fn error_statuses() {
        let (app, _, _) = app();
        let event_id = create_event(&app, 1).await;

        let (status, body) = call(&app, "GET", "/events/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "event missing not found"}));

        let (status, body) = call(
            &app,
            "POST",
            "/events",
            Some(json!({"name": "Old", "capacity": 1, "date": "2024-01-01T00:00:00Z", "payment_ttl": 60})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("date"));

        let (status, _) = call(&app, "POST", "/events", Some(json!({"name": "No capacity"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &app,
            "POST",
            &format!("/events/{event_id}/book"),
            Some(json!({"user_id": "42"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("user_id"));

        let (status, _) = call(
            &app,
            "POST",
            &format!("/events/{event_id}/book"),
            Some(json!({"user_id": "123456789"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = call(
            &app,
            "POST",
            &format!("/events/{event_id}/book"),
            Some(json!({"user_id": "987654321"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("sold out"));

        let (status, _) = call(
            &app,
            "POST",
            &format!("/events/{event_id}/confirm"),
            Some(json!({"booking_id": "missing"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &app,
            "POST",
            &format!("/events/{event_id}/confirm"),
            Some(json!({"booking_id": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("booking_id"));
    }

    #[tokio::test]
    async fn booking_under_wrong_event_is_rejected() {
        let (app, _, _) = app();
        let first = create_event(&app, 1).await;
        let second = create_event(&app, 1).await;
        let (_, body) = call(
            &app,
            "POST",
            &format!("/events/{first}/book"),
            Some(json!({"user_id": "123456789"})),
        )
        .await;
        let booking_id = body["id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &app,
            "POST",
            &format!("/events/{second}/confirm"),
            Some(json!({"booking_id": booking_id})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn store_failure_is_500_with_message() {
        let (app, store, _) = app();
        store.fail_next_commits(1);

        let (status, body) = call(
            &app,
            "POST",
            "/events",
            Some(json!({"name": "Concert", "capacity": 1, "date": "2025-02-01T19:00:00Z", "payment_ttl": 60})),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body["error"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn health_and_disabled_metrics() {
        let (app, _, _) = app();

        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, _) = call(&app, "GET", "/metrics", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
