//! JSON frames exchanged over the realtime socket

use crate::model::{ActionButton, MessageFormat};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Frame has no string `type` field")]
    MissingType,
}

/// Server push decoded from one text frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Typing { is_typing: bool },
    Message(InboundMessage),
    SessionUpdate {
        session_id: String,
        updates: Map<String, Value>,
    },
    /// Well-formed frame with a `type` this client does not handle
    Unknown { kind: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub format: Option<MessageFormat>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub suggested_actions: Vec<ActionButton>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingFrame {
    #[serde(default)]
    is_typing: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionUpdateFrame {
    session_id: String,
    #[serde(default)]
    updates: Map<String, Value>,
}

impl InboundEvent {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingType)?
            .to_string();

        let event = match kind.as_str() {
            "typing" => {
                let frame: TypingFrame = serde_json::from_value(value)?;
                InboundEvent::Typing {
                    is_typing: frame.is_typing,
                }
            }
            "message" => InboundEvent::Message(serde_json::from_value(value)?),
            "session_update" => {
                let frame: SessionUpdateFrame = serde_json::from_value(value)?;
                InboundEvent::SessionUpdate {
                    session_id: frame.session_id,
                    updates: frame.updates,
                }
            }
            _ => InboundEvent::Unknown { kind },
        };
        Ok(event)
    }
}
