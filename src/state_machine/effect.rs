//! Effects produced by state transitions

use super::state::RequestId;
use crate::config::Preferences;
use crate::model::Session;
use crate::transport::ChatRequest;
use std::time::Duration;

/// Side effects for the runtime to carry out after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a chat message; `demo` selects the public demo endpoint
    PostMessage {
        request_id: RequestId,
        request: ChatRequest,
        demo: bool,
    },
    /// Cancel an in-flight message request
    AbortRequest { request_id: RequestId },

    FetchHistory { session_id: String },
    DeleteHistory { session_id: String },
    EndSession { session_id: String },
    FetchSessions,

    OpenChannel { url: String },
    CloseChannel,
    /// Fire `ReconnectTimer { attempt }` after `delay`, replacing any pending one
    ScheduleReconnect { delay: Duration, attempt: u32 },
    CancelReconnect,
    /// Fire `TypingTimeout { generation }` after `delay`, replacing any pending one
    ScheduleTypingClear { delay: Duration, generation: u64 },
    CancelTypingClear,

    PersistSessions { sessions: Vec<Session> },
    PersistPreferences { preferences: Preferences },
}

impl Effect {
    pub fn persist_sessions(sessions: &[Session]) -> Self {
        Effect::PersistSessions {
            sessions: sessions.to_vec(),
        }
    }
}
