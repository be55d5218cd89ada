//! Notifications the transport raises for the hosting application

use serde_json::Value;
use std::time::Duration;

/// Fire-and-forget signals; nothing inside the crate consumes them
#[derive(Debug, Clone, PartialEq)]
pub enum ApiEvent {
    /// 401 received; the stored credential has already been cleared
    Unauthorized,
    Forbidden,
    RateLimit { retry_after: Option<Duration> },
    ServerError { status: u16, payload: Option<Value> },
}

impl ApiEvent {
    /// Name the browser widget used for the same signal
    pub fn name(&self) -> &'static str {
        match self {
            ApiEvent::Unauthorized => "auth:unauthorized",
            ApiEvent::Forbidden => "auth:forbidden",
            ApiEvent::RateLimit { .. } => "api:rateLimit",
            ApiEvent::ServerError { .. } => "api:serverError",
        }
    }
}
