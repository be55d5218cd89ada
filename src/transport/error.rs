//! Transport error types

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub const NETWORK_USER_MESSAGE: &str = "Network error. Please check your connection and try again.";
pub const GENERIC_USER_MESSAGE: &str = "An unexpected error occurred. Please try again.";

/// Transport error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    /// Diagnostic detail for logs
    pub message: String,
    /// Text suitable for showing to the end user
    pub user_message: String,
    pub status: Option<u16>,
    pub retry_after: Option<Duration>,
    /// Parsed response body, when the server sent JSON
    pub body: Option<Value>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        let user_message = match kind {
            ApiErrorKind::Network => NETWORK_USER_MESSAGE,
            ApiErrorKind::Canceled => "Request canceled.",
            _ => GENERIC_USER_MESSAGE,
        };
        Self {
            kind,
            message: message.into(),
            user_message: user_message.to_string(),
            status: None,
            retry_after: None,
            body: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn with_user_message(mut self, user_message: impl Into<String>) -> Self {
        self.user_message = user_message.into();
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Network, message)
    }

    pub fn canceled() -> Self {
        Self::new(ApiErrorKind::Canceled, "Request canceled")
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Unknown, message)
    }

    pub fn is_canceled(&self) -> bool {
        self.kind == ApiErrorKind::Canceled
    }

    /// The `message` field of a JSON error body, if the server sent one
    pub fn server_message(&self) -> Option<&str> {
        self.body.as_ref()?.get("message")?.as_str()
    }
}

/// Error classification for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// No response received (connect failure, timeout) - retryable
    Network,
    /// 401 - stored credential is cleared
    Unauthorized,
    /// 403
    Forbidden,
    /// 429 - retryable, honours `retry_after`
    RateLimited,
    /// 5xx - retryable
    ServerError,
    /// Other 4xx - never retried
    ClientError,
    /// Cooperative cancellation, not a failure of the call itself
    Canceled,
    /// Anything else - retryable
    Unknown,
}

impl ApiErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network | Self::ServerError | Self::RateLimited | Self::Unknown
        )
    }

    /// Classify an HTTP status that was not a success
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            429 => Self::RateLimited,
            500..=599 => Self::ServerError,
            400..=499 => Self::ClientError,
            _ => Self::Unknown,
        }
    }
}

/// Friendly text for a failed status, preferring the server's own message
pub fn user_message_for(status: u16, body: Option<&Value>) -> String {
    if let Some(msg) = body.and_then(|b| b.get("message")).and_then(Value::as_str) {
        return msg.to_string();
    }
    let fixed = match status {
        400 => "Invalid request. Please check your input and try again.",
        401 => "Authentication required. Please log in and try again.",
        403 => "You do not have permission to perform this action.",
        404 => "The requested resource was not found.",
        429 => "Too many requests. Please wait a moment and try again.",
        500 => "Server error. Please try again later.",
        502 | 503 => "Service temporarily unavailable. Please try again later.",
        _ => "An unexpected error occurred.",
    };
    fixed.to_string()
}
