//! Domain types held by the conversation state

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifier of a message in the in-memory set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

/// Rendering format of a message body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageFormat {
    #[default]
    Text,
    Card,
    List,
    Table,
    RichMedia,
    /// Any format this client does not know how to render specially
    #[serde(other)]
    Other,
}

/// Quick-reply button attached to an assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionButton {
    pub label: String,
    #[serde(default)]
    pub action: Option<String>,
    /// `link`, `function` or `navigation`
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub session_id: Option<String>,
    /// Plain text is a JSON string; rich formats may carry structured bodies
    pub content: Value,
    pub format: MessageFormat,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_actions: Vec<ActionButton>,
    #[serde(default)]
    pub error: bool,
}

impl Message {
    /// Text body, if the content is a plain string
    pub fn text(&self) -> Option<&str> {
        self.content.as_str()
    }
}

/// A message before it is inserted; id and defaults are filled on insert
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
    pub session_id: Option<String>,
    pub content: Value,
    pub format: MessageFormat,
    pub is_user: bool,
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: Option<Value>,
    pub suggested_actions: Vec<ActionButton>,
    pub error: bool,
}

impl MessageDraft {
    pub fn user(text: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            session_id,
            content: Value::String(text.into()),
            format: MessageFormat::Text,
            is_user: true,
            timestamp: None,
            metadata: None,
            suggested_actions: Vec::new(),
            error: false,
        }
    }

    pub fn assistant(content: Value, format: MessageFormat, session_id: Option<String>) -> Self {
        Self {
            session_id,
            content,
            format,
            is_user: false,
            timestamp: None,
            metadata: None,
            suggested_actions: Vec::new(),
            error: false,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, metadata: Option<Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn into_message(self, id: MessageId, now: DateTime<Utc>) -> Message {
        Message {
            id,
            session_id: self.session_id,
            content: self.content,
            format: self.format,
            is_user: self.is_user,
            timestamp: self.timestamp.unwrap_or(now),
            read: false,
            metadata: self.metadata,
            suggested_actions: self.suggested_actions,
            error: self.error,
        }
    }
}

/// Server-tracked conversation context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_activity: Option<DateTime<Utc>>,
    /// Any other fields the server attaches (`active`, `context`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: None,
            created_at: None,
            last_activity: None,
            extra: Map::new(),
        }
    }

    /// Overlay fields present in `newer`; absent fields keep their value
    pub fn merge_from(&mut self, newer: &Session) {
        if newer.user_id.is_some() {
            self.user_id.clone_from(&newer.user_id);
        }
        if newer.created_at.is_some() {
            self.created_at = newer.created_at;
        }
        if newer.last_activity.is_some() {
            self.last_activity = newer.last_activity;
        }
        for (key, value) in &newer.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }

    /// Apply a loose JSON patch. `sessionId` in the patch is ignored so the
    /// session keeps its identity.
    pub fn apply_updates(&mut self, updates: &Map<String, Value>) {
        let Ok(Value::Object(mut current)) = serde_json::to_value(&*self) else {
            return;
        };
        for (key, value) in updates {
            if key != "sessionId" {
                current.insert(key.clone(), value.clone());
            }
        }
        match serde_json::from_value::<Session>(Value::Object(current)) {
            Ok(updated) => *self = updated,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "Ignoring malformed session update");
            }
        }
    }
}

/// Timestamps from the backend come either as RFC 3339 or as zone-less
/// local date-times; the latter are taken as UTC.
pub mod lenient_timestamp {
    use super::{DateTime, Deserialize, Deserializer, NaiveDateTime, Utc};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lenient_timestamps() {
        let zoned = lenient_timestamp::parse("2024-05-01T10:00:00Z").unwrap();
        let local = lenient_timestamp::parse("2024-05-01T10:00:00.123").unwrap();
        assert_eq!(zoned.timestamp(), local.timestamp());
        assert!(lenient_timestamp::parse("yesterday").is_none());
    }

    #[test]
    fn test_unknown_format_falls_back() {
        let format: MessageFormat = serde_json::from_value(json!("CAROUSEL")).unwrap();
        assert_eq!(format, MessageFormat::Other);
        let format: MessageFormat = serde_json::from_value(json!("RICH_MEDIA")).unwrap();
        assert_eq!(format, MessageFormat::RichMedia);
    }

    #[test]
    fn test_session_keeps_extra_fields() {
        let session: Session = serde_json::from_value(json!({
            "sessionId": "s1",
            "userId": "u1",
            "createdAt": "2024-05-01T10:00:00",
            "active": true
        }))
        .unwrap();
        assert_eq!(session.extra["active"], true);
        assert!(session.created_at.is_some());

        let back = serde_json::to_value(&session).unwrap();
        assert_eq!(back["active"], true);
        assert_eq!(back["sessionId"], "s1");
    }

    #[test]
    fn test_session_merge_from_keeps_absent_fields() {
        let mut existing = Session::new("s1");
        existing.user_id = Some("alice".to_string());
        existing.extra.insert("title".to_string(), json!("Billing"));

        let mut newer = Session::new("s1");
        newer.extra.insert("active".to_string(), json!(false));
        existing.merge_from(&newer);

        assert_eq!(existing.user_id.as_deref(), Some("alice"));
        assert_eq!(existing.extra["title"], "Billing");
        assert_eq!(existing.extra["active"], false);
    }

    #[test]
    fn test_apply_updates_ignores_session_id() {
        let mut session = Session::new("s1");
        let updates = json!({ "sessionId": "other", "userId": "bob", "unread": 3 });
        session.apply_updates(updates.as_object().unwrap());
        assert_eq!(session.session_id, "s1");
        assert_eq!(session.user_id.as_deref(), Some("bob"));
        assert_eq!(session.extra["unread"], 3);
    }
}
