//! Channel tags and recipient validation.

use crate::notification::NotificationRequest;
use thiserror::Error;

/// Tag of the Telegram channel.
pub const TELEGRAM: &str = "telegram";

/// Number of digits in a Telegram recipient id.
pub const TELEGRAM_RECIPIENT_DIGITS: usize = 9;

/// Validation failure for an incoming notification request.
///
/// The message always names the offending field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is empty.
    #[error("{0} is required")]
    Empty(&'static str),

    /// The recipient does not match the channel's address format.
    #[error("recipient: {0}")]
    InvalidRecipient(String),

    /// The channel tag is not known.
    #[error("channel: unsupported channel {0:?}")]
    UnsupportedChannel(String),
}

/// Whether `recipient` is a valid Telegram chat id (`^[0-9]{9}$`).
#[must_use]
pub fn is_valid_telegram_recipient(recipient: &str) -> bool {
    recipient.len() == TELEGRAM_RECIPIENT_DIGITS && recipient.bytes().all(|b| b.is_ascii_digit())
}

/// Validate a recipient against the rules of its channel.
///
/// # Errors
///
/// Returns [`ValidationError::UnsupportedChannel`] for unknown tags and
/// [`ValidationError::InvalidRecipient`] for malformed addresses.
pub fn validate_recipient(channel: &str, recipient: &str) -> Result<(), ValidationError> {
    match channel {
        TELEGRAM => {
            if is_valid_telegram_recipient(recipient) {
                Ok(())
            } else {
                Err(ValidationError::InvalidRecipient(format!(
                    "telegram recipient must be exactly {TELEGRAM_RECIPIENT_DIGITS} digits"
                )))
            }
        }
        other => Err(ValidationError::UnsupportedChannel(other.to_string())),
    }
}

/// Validate a `POST /notify` body.
///
/// # Errors
///
/// Returns the first failing field: empty `channel`, `recipient` or
/// `message`, then channel-specific recipient rules.
pub fn validate_request(request: &NotificationRequest) -> Result<(), ValidationError> {
    if request.channel.is_empty() {
        return Err(ValidationError::Empty("channel"));
    }
    if request.recipient.is_empty() {
        return Err(ValidationError::Empty("recipient"));
    }
    if request.message.is_empty() {
        return Err(ValidationError::Empty("message"));
    }
    validate_recipient(&request.channel, &request.recipient)
}
