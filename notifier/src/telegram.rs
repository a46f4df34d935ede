//! Telegram Bot API sender.

use async_trait::async_trait;
use delayline_core::channel::{TELEGRAM, is_valid_telegram_recipient};
use delayline_core::notification::Notification;
use delayline_core::sender::{SendError, Sender};
use serde::Serialize;
use std::time::Duration;

/// Public Bot API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Delivers notifications with `sendMessage`.
#[derive(Clone)]
pub struct TelegramSender {
    client: reqwest::Client,
    bot_url: String,
}

impl TelegramSender {
    /// Sender for `token` against the public API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(token: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        Self::with_api_base(DEFAULT_API_BASE, token, timeout)
    }

    /// Sender against another Bot API server (self-hosted or a test double).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_api_base(
        api_base: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            bot_url: format!("{}/bot{token}", api_base.trim_end_matches('/')),
        })
    }

    /// Call `getMe` to check the token.
    ///
    /// # Errors
    ///
    /// Returns a message describing the transport failure or the status code.
    pub async fn verify(&self) -> Result<(), String> {
        let response = self
            .client
            .get(format!("{}/getMe", self.bot_url))
            .send()
            .await
            .map_err(|e| format!("telegram getMe failed: {}", e.without_url()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("telegram getMe returned {status}"))
        }
    }
}

impl std::fmt::Debug for TelegramSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // bot_url embeds the token
        f.debug_struct("TelegramSender").finish_non_exhaustive()
    }
}

#[async_trait]
impl Sender for TelegramSender {
    fn name(&self) -> &str {
        TELEGRAM
    }

    async fn send(&self, notification: &Notification) -> Result<(), SendError> {
        if notification.channel != TELEGRAM {
            return Err(SendError::Permanent(format!(
                "unsupported channel: {}",
                notification.channel
            )));
        }
        if notification.recipient.is_empty() {
            return Err(SendError::Permanent("empty recipient".to_string()));
        }
        if !is_valid_telegram_recipient(&notification.recipient) {
            return Err(SendError::Permanent(format!(
                "invalid telegram recipient: {}",
                notification.recipient
            )));
        }

        let response = self
            .client
            .post(format!("{}/sendMessage", self.bot_url))
            .json(&SendMessage {
                chat_id: &notification.recipient,
                text: &notification.message,
            })
            .send()
            .await
            .map_err(|e| {
                // reqwest includes the URL, and with it the token, in its message
                SendError::Retryable(format!("telegram request failed: {}", e.without_url()))
            })?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(notification_id = %notification.id, "Telegram accepted message");
            Ok(())
        } else {
            Err(SendError::Retryable(format!(
                "telegram status {}",
                status.as_u16()
            )))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use delayline_core::notification::NotificationRequest;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notification(channel: &str, recipient: &str) -> Notification {
        Notification::scheduled(
            "n-1",
            NotificationRequest {
                send_at: None,
                channel: channel.to_string(),
                recipient: recipient.to_string(),
                message: "hi".to_string(),
            },
            Utc::now(),
        )
    }

    async fn sender(server: &MockServer) -> TelegramSender {
        TelegramSender::with_api_base(&server.uri(), "TOKEN", Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn posts_chat_id_and_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_json(serde_json::json!({"chat_id": "111222333", "text": "hi"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        sender(&server)
            .await
            .send(&notification("telegram", "111222333"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = sender(&server)
            .await
            .send(&notification("telegram", "111222333"))
            .await
            .unwrap_err();
        assert_eq!(err, SendError::Retryable("telegram status 500".to_string()));
    }

    #[tokio::test]
    async fn slow_server_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let sender =
            TelegramSender::with_api_base(&server.uri(), "TOKEN", Duration::from_millis(100))
                .unwrap();
        let err = sender
            .send(&notification("telegram", "111222333"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!err.to_string().contains("TOKEN"));
    }

    #[tokio::test]
    async fn wrong_channel_and_bad_recipient_are_permanent() {
        let server = MockServer::start().await;
        let sender = sender(&server).await;

        assert_eq!(
            sender.send(&notification("email", "a@b.c")).await,
            Err(SendError::Permanent("unsupported channel: email".to_string()))
        );
        assert_eq!(
            sender.send(&notification("telegram", "")).await,
            Err(SendError::Permanent("empty recipient".to_string()))
        );
        assert_eq!(
            sender.send(&notification("telegram", "12345")).await,
            Err(SendError::Permanent(
                "invalid telegram recipient: 12345".to_string()
            ))
        );
        assert_eq!(
            sender.send(&notification("telegram", "12345678a")).await,
            Err(SendError::Permanent(
                "invalid telegram recipient: 12345678a".to_string()
            ))
        );
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn verify_checks_get_me() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/botTOKEN/getMe"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = sender(&server).await.verify().await.unwrap_err();
        assert!(err.contains("401"));
    }
}
