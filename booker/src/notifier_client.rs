//! HTTP client for the notifier API.

use async_trait::async_trait;
use delayline_core::notification::{Notification, NotificationRequest};
use delayline_core::notifier_client::{NotifierClient, NotifierClientError};
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;

/// Error body returned by the notifier.
#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Notifier API client.
#[derive(Clone, Debug)]
pub struct HttpNotifierClient {
    client: Client,
    base_url: String,
}

impl HttpNotifierClient {
    /// Client for the notifier at `base_url`, e.g. `http://notifier:8080`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Turn a non-2xx answer into [`NotifierClientError::Status`], preferring the
/// server's `{"error": ...}` message over the bare reason phrase.
async fn status_error(response: Response) -> NotifierClientError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string()
        });
    NotifierClientError::Status {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl NotifierClient for HttpNotifierClient {
    async fn schedule(
        &self,
        request: &NotificationRequest,
    ) -> Result<Notification, NotifierClientError> {
        let response = self
            .client
            .post(format!("{}/notify", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| NotifierClientError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let notification = response
            .json::<Notification>()
            .await
            .map_err(|e| NotifierClientError::InvalidResponse(e.to_string()))?;

        tracing::debug!(
            notification_id = %notification.id,
            send_at = %notification.send_at,
            "Notification scheduled"
        );
        Ok(notification)
    }

    async fn cancel(&self, id: &str) -> Result<(), NotifierClientError> {
        let response = self
            .client
            .delete(format!("{}/notify/{id}", self.base_url))
            .send()
            .await
            .map_err(|e| NotifierClientError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> NotificationRequest {
        NotificationRequest {
            send_at: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 10, 0).unwrap()),
            channel: "telegram".to_string(),
            recipient: "123456789".to_string(),
            message: "Your booking b1 for event e1 has been canceled".to_string(),
        }
    }

    fn client(server: &MockServer) -> HttpNotifierClient {
        HttpNotifierClient::new(&format!("{}/", server.uri()), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn schedule_posts_the_request_and_decodes_the_record() {
        let server = MockServer::start().await;
        let created = Notification::scheduled(
            "n-42",
            request(),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        );
        Mock::given(method("POST"))
            .and(path("/notify"))
            .and(body_partial_json(json!({
                "channel": "telegram",
                "recipient": "123456789",
                "send_at": "2025-01-01T00:10:00Z",
            })))
            .respond_with(ResponseTemplate::new(202).set_body_json(&created))
            .expect(1)
            .mount(&server)
            .await;

        let notification = client(&server).schedule(&request()).await.unwrap();

        assert_eq!(notification, created);
    }

    #[tokio::test]
    async fn schedule_surfaces_the_server_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notify"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"error": "telegram recipient must be exactly 9 digits"})),
            )
            .mount(&server)
            .await;

        let err = client(&server).schedule(&request()).await.unwrap_err();

        assert_eq!(
            err,
            NotifierClientError::Status {
                status: 400,
                message: "telegram recipient must be exactly 9 digits".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn schedule_without_error_body_uses_reason_phrase() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notify"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server).schedule(&request()).await.unwrap_err();

        assert_eq!(
            err,
            NotifierClientError::Status {
                status: 503,
                message: "Service Unavailable".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn schedule_rejects_undecodable_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notify"))
            .respond_with(ResponseTemplate::new(202).set_body_string("accepted"))
            .mount(&server)
            .await;

        let err = client(&server).schedule(&request()).await.unwrap_err();

        assert!(matches!(err, NotifierClientError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn cancel_deletes_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/notify/n-42"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).cancel("n-42").await.unwrap();
    }

    #[tokio::test]
    async fn cancel_reports_server_failure() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/notify/n-42"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "redis down"})))
            .mount(&server)
            .await;

        let err = client(&server).cancel("n-42").await.unwrap_err();

        assert_eq!(
            err,
            NotifierClientError::Status {
                status: 500,
                message: "redis down".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn unreachable_notifier_is_a_transport_error() {
        let client = HttpNotifierClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();

        let err = client.cancel("n-1").await.unwrap_err();

        assert!(matches!(err, NotifierClientError::Transport(_)));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = HttpNotifierClient::new("http://notifier:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://notifier:8080");
    }
}
