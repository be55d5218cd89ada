//! Pure state transition function

use super::state::{
    ChatState, ConnectionStatus, PendingRequest, RequestId, ANONYMOUS_USER, MAX_MESSAGE_CHARS,
};
use super::{Effect, Event};
use crate::config::{ConfigPatch, PreferencesPatch};
use crate::model::{MessageDraft, MessageId, Session};
use crate::realtime::{ChannelEvent, InboundEvent, InboundMessage, ReconnectPolicy};
use crate::transport::{ApiError, ChatRequest, ChatResponse, HistoryEntry, MessageContext};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

/// Assistant reply shown when sending fails
pub const SEND_FAILURE_REPLY: &str =
    "Sorry, I encountered an error processing your message. Please try again.";
pub const SEND_FAILED_ERROR: &str = "Failed to send message";
pub const HISTORY_FAILED_ERROR: &str = "Failed to load chat history";
pub const CLEAR_FAILED_ERROR: &str = "Failed to clear chat history";
pub const CHANNEL_ERROR: &str = "WebSocket connection error";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ChatState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ChatState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Events rejected outright; the state is left untouched
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Message is {chars} characters long; the limit is {max}")]
    MessageTooLong { chars: usize, max: usize },
    #[error("No active session")]
    NoActiveSession,
    #[error("Request {0} is already in flight")]
    DuplicateRequest(RequestId),
}

/// Pure transition function: same inputs, same outputs, no I/O.
pub fn transition(
    state: &ChatState,
    now: DateTime<Utc>,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    let mut next = state.clone();

    let effects = match event {
        // ============================================================
        // Messages
        // ============================================================
        Event::UserMessage {
            request_id,
            text,
            context,
        } => send_message(&mut next, now, request_id, text, context)?,

        Event::CancelRequest { request_id } => match next.take_pending(request_id) {
            Some(_) => vec![Effect::AbortRequest { request_id }],
            None => vec![],
        },

        Event::MessageResponse {
            request_id,
            response,
        } => message_response(&mut next, now, request_id, &response),

        Event::MessageFailed { request_id, error } => {
            message_failed(&mut next, now, request_id, &error);
            vec![]
        }

        Event::MarkAllRead => {
            for message in next.messages.iter_mut().filter(|m| !m.is_user) {
                message.read = true;
            }
            vec![]
        }

        Event::UpdateMessage { id, read, metadata } => {
            update_message(&mut next, id, read, metadata);
            vec![]
        }

        // ============================================================
        // History
        // ============================================================
        Event::LoadHistory { session_id } => {
            next.loading_history = Some(session_id.clone());
            vec![Effect::FetchHistory { session_id }]
        }

        Event::HistoryLoaded {
            session_id,
            entries,
        } => {
            if next.loading_history.as_deref() == Some(session_id.as_str()) {
                next.loading_history = None;
                replay_history(&mut next, now, &entries);
            }
            vec![]
        }

        Event::HistoryFailed { session_id, .. } => {
            if next.loading_history.as_deref() == Some(session_id.as_str()) {
                next.loading_history = None;
                next.last_error = Some(HISTORY_FAILED_ERROR.to_string());
            }
            vec![]
        }

        Event::ClearHistory => match next.current_session_id() {
            Some(id) => vec![Effect::DeleteHistory {
                session_id: id.to_string(),
            }],
            None => {
                next.messages.clear();
                vec![]
            }
        },

        Event::HistoryCleared { .. } => {
            next.messages.clear();
            vec![]
        }

        Event::ClearHistoryFailed { .. } => {
            next.last_error = Some(CLEAR_FAILED_ERROR.to_string());
            vec![]
        }

        // ============================================================
        // Sessions
        // ============================================================
        Event::SetSession { session } => {
            next.current_session = Some(next.upsert_session(session));
            vec![Effect::persist_sessions(&next.session_history)]
        }

        Event::UpdateSession {
            session_id,
            updates,
        } => update_session(&mut next, &session_id, &updates),

        Event::EndSession => match next.current_session_id() {
            Some(id) => vec![Effect::EndSession {
                session_id: id.to_string(),
            }],
            None => return Err(TransitionError::NoActiveSession),
        },

        Event::SessionEnded { session_id } => {
            if next.current_session_id() == Some(session_id.as_str()) {
                next.current_session = None;
            }
            vec![]
        }

        Event::RefreshSessions => vec![Effect::FetchSessions],

        Event::SessionsLoaded { sessions } => {
            if sessions.is_empty() {
                vec![]
            } else {
                // Reverse so the server's first entry ends up in front
                for session in sessions.into_iter().rev() {
                    if let Some(current) = next
                        .current_session
                        .as_mut()
                        .filter(|c| c.session_id == session.session_id)
                    {
                        current.merge_from(&session);
                    }
                    next.upsert_session(session);
                }
                vec![Effect::persist_sessions(&next.session_history)]
            }
        }

        Event::RequestFailed { error, .. } => {
            if !error.is_canceled() {
                next.last_error = Some(error.user_message.clone());
            }
            vec![]
        }

        // ============================================================
        // Settings
        // ============================================================
        Event::UpdatePreferences { patch } => update_preferences(&mut next, &patch),

        Event::UpdateConfig { patch } => {
            update_config(&mut next, &patch);
            vec![]
        }

        // ============================================================
        // Connection
        // ============================================================
        Event::Connect => {
            next.wants_connection = true;
            next.reconnect_attempts = 0;
            vec![Effect::CancelReconnect]
        }

        Event::Disconnect => {
            next.wants_connection = false;
            vec![Effect::CancelReconnect, Effect::CloseChannel]
        }

        Event::Channel(channel_event) => handle_channel(&mut next, now, channel_event),

        Event::ReconnectTimer { attempt } => {
            let current = next.wants_connection
                && next.connection == ConnectionStatus::Disconnected
                && attempt == next.reconnect_attempts + 1;
            if current {
                next.reconnect_attempts = attempt;
                vec![Effect::OpenChannel {
                    url: next.config.ws_url.clone(),
                }]
            } else {
                vec![]
            }
        }

        Event::TypingTimeout { generation } => {
            if generation == next.typing_generation {
                next.is_typing = false;
            }
            vec![]
        }
    };

    Ok(TransitionResult::new(next).with_effects(effects))
}

/// Reject text the backend would refuse: blank, or over the length limit
pub fn validate_message(text: &str) -> Result<(), TransitionError> {
    if text.trim().is_empty() {
        return Err(TransitionError::EmptyMessage);
    }
    let chars = text.chars().count();
    if chars > MAX_MESSAGE_CHARS {
        return Err(TransitionError::MessageTooLong {
            chars,
            max: MAX_MESSAGE_CHARS,
        });
    }
    Ok(())
}

fn send_message(
    state: &mut ChatState,
    now: DateTime<Utc>,
    request_id: RequestId,
    text: String,
    context: MessageContext,
) -> Result<Vec<Effect>, TransitionError> {
    validate_message(&text)?;
    if state.pending.iter().any(|p| p.request_id == request_id) {
        return Err(TransitionError::DuplicateRequest(request_id));
    }

    let session_id = state.current_session_id().map(str::to_string);
    let user_id = state
        .current_session
        .as_ref()
        .and_then(|s| s.user_id.clone())
        .unwrap_or_else(|| ANONYMOUS_USER.to_string());

    state.last_error = None;
    state.push_message(MessageDraft::user(text.clone(), session_id.clone()), now);
    state.pending.push(PendingRequest {
        request_id,
        user_id: user_id.clone(),
    });

    let MessageContext {
        current_page,
        mut system_context,
        user_preferences,
    } = context;
    system_context.insert(
        "timestamp".to_string(),
        Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    system_context.insert(
        "sessionId".to_string(),
        session_id.clone().map_or(Value::Null, Value::String),
    );
    let mut preferences = state.preferences.to_map();
    preferences.extend(user_preferences);

    let request = ChatRequest {
        message: text,
        session_id,
        user_id,
        current_page,
        system_context,
        user_preferences: preferences,
    };
    Ok(vec![Effect::PostMessage {
        request_id,
        request,
        demo: state.config.demo_mode,
    }])
}

fn message_response(
    state: &mut ChatState,
    now: DateTime<Utc>,
    request_id: RequestId,
    response: &ChatResponse,
) -> Vec<Effect> {
    let Some(pending) = state.take_pending(request_id) else {
        return vec![];
    };

    let mut effects = vec![];
    let new_session = response
        .session_id
        .as_deref()
        .filter(|id| !id.is_empty() && state.current_session_id() != Some(*id));
    if let Some(session_id) = new_session {
        let session = Session {
            session_id: session_id.to_string(),
            user_id: Some(pending.user_id),
            created_at: Some(now),
            last_activity: Some(now),
            extra: Map::new(),
        };
        state.current_session = Some(state.upsert_session(session));
        effects.push(Effect::persist_sessions(&state.session_history));
    }

    let draft = MessageDraft {
        session_id: response.session_id.clone(),
        content: response.body(),
        format: response.response_format.unwrap_or_default(),
        is_user: false,
        timestamp: response.timestamp,
        metadata: response.metadata.clone(),
        suggested_actions: response.suggested_actions.clone().unwrap_or_default(),
        error: false,
    };
    state.push_message(draft, now);
    effects
}

fn message_failed(
    state: &mut ChatState,
    now: DateTime<Utc>,
    request_id: RequestId,
    error: &ApiError,
) {
    if state.take_pending(request_id).is_none() || error.is_canceled() {
        return;
    }

    let mut draft = MessageDraft::assistant(
        Value::String(SEND_FAILURE_REPLY.to_string()),
        Default::default(),
        state.current_session_id().map(str::to_string),
    );
    draft.error = true;
    state.push_message(draft, now);
    state.last_error = Some(error.server_message().unwrap_or(SEND_FAILED_ERROR).to_string());
}

fn update_message(state: &mut ChatState, id: MessageId, read: Option<bool>, metadata: Option<Value>) {
    let Some(message) = state.messages.iter_mut().find(|m| m.id == id) else {
        return;
    };
    if let Some(read) = read {
        message.read = read;
    }
    if metadata.is_some() {
        message.metadata = metadata;
    }
}

/// Replace the message set with one user/assistant pair per entry
fn replay_history(state: &mut ChatState, now: DateTime<Utc>, entries: &[HistoryEntry]) {
    state.messages.clear();
    for entry in entries {
        let question = MessageDraft::user(
            entry.message.clone().unwrap_or_default(),
            entry.session_id.clone(),
        )
        .with_timestamp(entry.timestamp);
        state.push_message(question, now);

        let answer = MessageDraft::assistant(
            Value::String(entry.response.clone().unwrap_or_default()),
            entry.response_format.unwrap_or_default(),
            entry.session_id.clone(),
        )
        .with_timestamp(entry.timestamp)
        .with_metadata(Some(entry.parsed_metadata()));
        state.push_message(answer, now);
    }
}

fn update_session(
    state: &mut ChatState,
    session_id: &str,
    updates: &Map<String, Value>,
) -> Vec<Effect> {
    if let Some(current) = state
        .current_session
        .as_mut()
        .filter(|s| s.session_id == session_id)
    {
        current.apply_updates(updates);
    }
    match state
        .session_history
        .iter_mut()
        .find(|s| s.session_id == session_id)
    {
        Some(entry) => {
            entry.apply_updates(updates);
            vec![Effect::persist_sessions(&state.session_history)]
        }
        None => vec![],
    }
}

fn update_preferences(state: &mut ChatState, patch: &PreferencesPatch) -> Vec<Effect> {
    state.preferences.apply(patch);
    vec![Effect::PersistPreferences {
        preferences: state.preferences.clone(),
    }]
}

fn update_config(state: &mut ChatState, patch: &ConfigPatch) {
    state.config.apply(patch);
    state.enforce_retention();
}

fn handle_channel(state: &mut ChatState, now: DateTime<Utc>, event: ChannelEvent) -> Vec<Effect> {
    match event {
        ChannelEvent::Connecting => {
            state.connection = ConnectionStatus::Connecting;
            vec![]
        }
        ChannelEvent::Opened => {
            state.connection = ConnectionStatus::Connected;
            state.reconnect_attempts = 0;
            state.wants_connection = true;
            vec![]
        }
        ChannelEvent::Error { .. } => {
            state.last_error = Some(CHANNEL_ERROR.to_string());
            vec![]
        }
        ChannelEvent::Closed { locally_initiated } => {
            state.connection = ConnectionStatus::Disconnected;
            if locally_initiated || !state.wants_connection {
                return vec![];
            }
            let policy = ReconnectPolicy::from_config(&state.config);
            match policy.next_delay(state.reconnect_attempts) {
                Some(delay) => vec![Effect::ScheduleReconnect {
                    delay,
                    attempt: state.reconnect_attempts + 1,
                }],
                None => vec![],
            }
        }
        ChannelEvent::Inbound(inbound) => handle_inbound(state, now, inbound),
    }
}

fn handle_inbound(state: &mut ChatState, now: DateTime<Utc>, event: InboundEvent) -> Vec<Effect> {
    match event {
        InboundEvent::Typing { is_typing } => {
            state.is_typing = is_typing;
            state.typing_generation += 1;
            if is_typing {
                vec![Effect::ScheduleTypingClear {
                    delay: state.config.typing_timeout,
                    generation: state.typing_generation,
                }]
            } else {
                vec![Effect::CancelTypingClear]
            }
        }
        InboundEvent::Message(InboundMessage {
            content,
            format,
            metadata,
            session_id,
            suggested_actions,
        }) => {
            let mut draft =
                MessageDraft::assistant(content, format.unwrap_or_default(), session_id)
                    .with_metadata(metadata);
            draft.suggested_actions = suggested_actions;
            state.push_message(draft, now);
            vec![]
        }
        InboundEvent::SessionUpdate {
            session_id,
            updates,
        } => update_session(state, &session_id, &updates),
        InboundEvent::Unknown { .. } => vec![],
    }
}
