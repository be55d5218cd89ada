//! Conversation state types

use crate::config::{ClientConfig, Preferences};
use crate::model::{Message, MessageDraft, MessageId, Session};
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// Session history keeps at most this many entries
pub const SESSION_HISTORY_LIMIT: usize = 10;

/// Longest message the backend accepts, in characters
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// `userId` sent when no session has told us who the user is
pub const ANONYMOUS_USER: &str = "anonymous";

/// Correlates an outgoing message with its response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// A chat request awaiting its response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub request_id: RequestId,
    /// `userId` the request went out with; a new session inherits it
    pub user_id: String,
}

/// Everything the client knows about the conversation
#[derive(Debug, Clone, PartialEq)]
pub struct ChatState {
    pub(crate) messages: Vec<Message>,
    pub(crate) next_message_id: u64,
    pub(crate) current_session: Option<Session>,
    /// Most recent first
    pub(crate) session_history: Vec<Session>,
    pub(crate) connection: ConnectionStatus,
    pub(crate) reconnect_attempts: u32,
    /// Set by an explicit connect or a successful open, cleared by disconnect
    pub(crate) wants_connection: bool,
    pub(crate) is_typing: bool,
    /// Bumped on every typing event; only the newest clear timer applies
    pub(crate) typing_generation: u64,
    pub(crate) pending: Vec<PendingRequest>,
    /// Session whose history fetch is in flight
    pub(crate) loading_history: Option<String>,
    pub(crate) last_error: Option<String>,
    pub(crate) config: ClientConfig,
    pub(crate) preferences: Preferences,
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl ChatState {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            messages: Vec::new(),
            next_message_id: 1,
            current_session: None,
            session_history: Vec::new(),
            connection: ConnectionStatus::Disconnected,
            reconnect_attempts: 0,
            wants_connection: false,
            is_typing: false,
            typing_generation: 0,
            pending: Vec::new(),
            loading_history: None,
            last_error: None,
            config,
            preferences: Preferences::default(),
        }
    }

    /// State rebuilt from the local cache. `sessions` is most recent first;
    /// the first one becomes the current session.
    pub fn restore(config: ClientConfig, preferences: Preferences, sessions: Vec<Session>) -> Self {
        let mut state = Self::new(config);
        state.preferences = preferences;
        for session in sessions.into_iter().rev() {
            state.upsert_session(session);
        }
        state.current_session = state.session_history.first().cloned();
        state
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    /// All retained messages, oldest first
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.current_session.as_ref()
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.current_session.as_ref().map(|s| s.session_id.as_str())
    }

    pub fn session_history(&self) -> &[Session] {
        &self.session_history
    }

    pub fn connection(&self) -> ConnectionStatus {
        self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionStatus::Connected
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn is_typing(&self) -> bool {
        self.is_typing
    }

    /// True while a message request or history fetch is in flight
    pub fn is_loading(&self) -> bool {
        !self.pending.is_empty() || self.loading_history.is_some()
    }

    pub fn pending_requests(&self) -> &[PendingRequest] {
        &self.pending
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// Messages of the current session, or every message when there is none
    pub fn current_messages(&self) -> Vec<&Message> {
        match self.current_session_id() {
            Some(id) => self
                .messages
                .iter()
                .filter(|m| m.session_id.as_deref() == Some(id))
                .collect(),
            None => self.messages.iter().collect(),
        }
    }

    pub fn unread_count(&self) -> usize {
        self.messages.iter().filter(|m| !m.is_user && !m.read).count()
    }

    pub fn has_unread(&self) -> bool {
        self.unread_count() > 0
    }

    pub fn is_ready(&self) -> bool {
        !self.is_loading() && self.is_connected()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn session_by_id(&self, session_id: &str) -> Option<&Session> {
        self.session_history
            .iter()
            .find(|s| s.session_id == session_id)
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    // ------------------------------------------------------------------
    // Mutation helpers used by `transition`
    // ------------------------------------------------------------------

    /// Append a message, then trim the oldest beyond the retention limit
    pub(crate) fn push_message(&mut self, draft: MessageDraft, now: DateTime<Utc>) -> MessageId {
        let id = MessageId(self.next_message_id);
        self.next_message_id += 1;
        self.messages.push(draft.into_message(id, now));
        self.enforce_retention();
        id
    }

    pub(crate) fn enforce_retention(&mut self) {
        let limit = self.config.message_retention.max(1);
        if self.messages.len() > limit {
            let excess = self.messages.len() - limit;
            self.messages.drain(..excess);
        }
    }

    /// Insert or refresh a session in the history. An existing entry is
    /// merged and moved to the front. Returns the stored record.
    pub(crate) fn upsert_session(&mut self, session: Session) -> Session {
        let merged = match self
            .session_history
            .iter()
            .position(|s| s.session_id == session.session_id)
        {
            Some(index) => {
                let mut existing = self.session_history.remove(index);
                existing.merge_from(&session);
                existing
            }
            None => session,
        };
        self.session_history.insert(0, merged.clone());
        self.session_history.truncate(SESSION_HISTORY_LIMIT);
        merged
    }

    pub(crate) fn take_pending(&mut self, request_id: RequestId) -> Option<PendingRequest> {
        let index = self
            .pending
            .iter()
            .position(|p| p.request_id == request_id)?;
        Some(self.pending.remove(index))
    }
}
