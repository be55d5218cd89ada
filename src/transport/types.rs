//! Wire types for the chat HTTP API (camelCase JSON)

use crate::model::{lenient_timestamp, ActionButton, MessageFormat, Session};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of `POST /chat/message` and `POST /chat/public/demo`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<String>,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_page: Option<String>,
    pub system_context: Map<String, Value>,
    pub user_preferences: Map<String, Value>,
}

/// Caller-supplied context attached to an outgoing message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageContext {
    pub current_page: Option<String>,
    pub system_context: Map<String, Value>,
    /// Per-request overrides layered over the stored preferences
    pub user_preferences: Map<String, Value>,
}

impl MessageContext {
    pub fn page(current_page: impl Into<String>) -> Self {
        Self {
            current_page: Some(current_page.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatResponse {
    pub session_id: Option<String>,
    pub message: Option<String>,
    pub response_format: Option<MessageFormat>,
    /// Format-dependent body; falls back to `message` when absent
    pub content: Option<Value>,
    #[serde(deserialize_with = "lenient_timestamp::option")]
    pub timestamp: Option<DateTime<Utc>>,
    pub success: bool,
    pub error: Option<String>,
    pub metadata: Option<Value>,
    pub suggested_actions: Option<Vec<ActionButton>>,
}

impl ChatResponse {
    /// Displayable body: `content` when present, otherwise `message`
    pub fn body(&self) -> Value {
        match (&self.content, &self.message) {
            (Some(content), _) if !content.is_null() => content.clone(),
            (_, Some(message)) => Value::String(message.clone()),
            _ => Value::String(String::new()),
        }
    }
}

/// One stored exchange from `GET /chat/history/{sessionId}`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryEntry {
    pub id: Option<i64>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    /// What the user asked
    pub message: Option<String>,
    /// What the assistant answered
    pub response: Option<String>,
    pub response_format: Option<MessageFormat>,
    /// Usually a JSON document encoded as a string
    pub metadata: Option<Value>,
    #[serde(deserialize_with = "lenient_timestamp::option")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl HistoryEntry {
    /// Decoded metadata; an absent value becomes an empty object and an
    /// unparseable string is kept verbatim
    pub fn parsed_metadata(&self) -> Value {
        match &self.metadata {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(Value::String(raw)) if raw.is_empty() => Value::Object(Map::new()),
            Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "History metadata is not valid JSON; keeping raw text");
                Value::String(raw.clone())
            }),
            Some(other) => other.clone(),
        }
    }
}

/// `GET /chat/sessions` returns full session records
pub type SessionSummary = Session;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HealthStatus {
    pub status: String,
    pub service: Option<String>,
    pub timestamp: Option<String>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy") || self.status.eq_ignore_ascii_case("up")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let req = ChatRequest {
            message: "hello".to_string(),
            session_id: None,
            user_id: "anonymous".to_string(),
            current_page: Some("/billing".to_string()),
            system_context: Map::new(),
            user_preferences: Map::new(),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["userId"], "anonymous");
        assert_eq!(v["currentPage"], "/billing");
        assert!(v["sessionId"].is_null());
        assert!(v["systemContext"].is_object());
    }

    #[test]
    fn test_response_body_fallback() {
        let resp: ChatResponse = serde_json::from_value(json!({
            "sessionId": "s1",
            "message": "Hi there",
            "responseFormat": "TEXT",
            "timestamp": "2024-05-01T10:00:00",
            "success": true,
            "suggestedActions": null
        }))
        .unwrap();
        assert_eq!(resp.body(), json!("Hi there"));
        assert_eq!(resp.response_format, Some(MessageFormat::Text));
        assert!(resp.timestamp.is_some());

        let rich: ChatResponse = serde_json::from_value(json!({
            "message": "fallback",
            "content": { "title": "Card" },
            "responseFormat": "CARD"
        }))
        .unwrap();
        assert_eq!(rich.body(), json!({ "title": "Card" }));
    }

    #[test]
    fn test_history_metadata_parsing() {
        let entry = HistoryEntry {
            metadata: Some(json!("{\"source\":\"faq\"}")),
            ..Default::default()
        };
        assert_eq!(entry.parsed_metadata(), json!({ "source": "faq" }));

        let empty = HistoryEntry::default();
        assert_eq!(empty.parsed_metadata(), json!({}));

        let broken = HistoryEntry {
            metadata: Some(json!("{not json")),
            ..Default::default()
        };
        assert_eq!(broken.parsed_metadata(), json!("{not json"));
    }

    #[test]
    fn test_health_status() {
        let health: HealthStatus =
            serde_json::from_value(json!({ "status": "healthy", "service": "AI Chatbot API" }))
                .unwrap();
        assert!(health.is_healthy());
        assert!(!HealthStatus::default().is_healthy());
    }
}
