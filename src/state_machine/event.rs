//! Events that drive the chat state

use super::state::RequestId;
use crate::config::{ConfigPatch, PreferencesPatch};
use crate::model::{MessageId, Session};
use crate::realtime::ChannelEvent;
use crate::transport::{ApiError, ChatResponse, HistoryEntry, MessageContext, SessionSummary};
use serde_json::{Map, Value};

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User actions
    UserMessage {
        request_id: RequestId,
        text: String,
        context: MessageContext,
    },
    CancelRequest {
        request_id: RequestId,
    },
    LoadHistory {
        session_id: String,
    },
    ClearHistory,
    MarkAllRead,
    UpdateMessage {
        id: MessageId,
        read: Option<bool>,
        metadata: Option<Value>,
    },
    SetSession {
        session: Session,
    },
    UpdateSession {
        session_id: String,
        updates: Map<String, Value>,
    },
    EndSession,
    RefreshSessions,
    UpdatePreferences {
        patch: PreferencesPatch,
    },
    UpdateConfig {
        patch: ConfigPatch,
    },
    Connect,
    Disconnect,

    // Transport results
    MessageResponse {
        request_id: RequestId,
        response: ChatResponse,
    },
    MessageFailed {
        request_id: RequestId,
        error: ApiError,
    },
    HistoryLoaded {
        session_id: String,
        entries: Vec<HistoryEntry>,
    },
    HistoryFailed {
        session_id: String,
        error: ApiError,
    },
    HistoryCleared {
        session_id: String,
    },
    ClearHistoryFailed {
        session_id: String,
        error: ApiError,
    },
    SessionEnded {
        session_id: String,
    },
    SessionsLoaded {
        sessions: Vec<SessionSummary>,
    },
    /// Failure of a call whose result has no dedicated event
    RequestFailed {
        operation: &'static str,
        error: ApiError,
    },

    // Realtime channel and timers
    Channel(ChannelEvent),
    ReconnectTimer {
        attempt: u32,
    },
    TypingTimeout {
        generation: u64,
    },
}
