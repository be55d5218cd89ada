//! Runtime for driving a chat client
//!
//! `ChatHandle` is the caller-facing side: it turns calls into events and
//! exposes the latest state. `ChatRuntime` owns the state and performs the
//! effects of every transition.

mod executor;

#[cfg(test)]
pub mod testing;

pub use executor::ChatRuntime;

use crate::config::{ClientConfig, ConfigError, ConfigPatch, PreferencesPatch};
use crate::model::{MessageId, Session};
use crate::persistence::{load_preferences, load_sessions, PersistenceStore};
use crate::realtime::{ChannelError, Connector, RealtimeChannel};
use crate::state_machine::{validate_message, ChatState, Event, RequestId, TransitionError};
use crate::transport::{ChatApi, MessageContext};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("Chat runtime has stopped")]
    Closed,
    #[error(transparent)]
    Rejected(#[from] TransitionError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Handle to a running chat client; clones drive the same runtime
#[derive(Clone)]
pub struct ChatHandle {
    event_tx: mpsc::Sender<Event>,
    state_rx: watch::Receiver<ChatState>,
    channel: RealtimeChannel,
}

impl ChatHandle {
    /// Restore persisted preferences and sessions, then spawn the runtime.
    /// The runtime stops once every handle has been dropped.
    pub async fn start<A, S>(
        config: ClientConfig,
        api: A,
        connector: Arc<dyn Connector>,
        store: S,
    ) -> Result<(Self, JoinHandle<()>), ConfigError>
    where
        A: ChatApi + 'static,
        S: PersistenceStore + 'static,
    {
        config.validate()?;
        let preferences = load_preferences(&store).await;
        let sessions = load_sessions(&store).await;
        let state = ChatState::restore(config, preferences, sessions);
        tracing::info!(
            api_url = %state.config().api_url,
            session = ?state.current_session_id(),
            "Chat client restored"
        );

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(state.clone());
        let channel = RealtimeChannel::new(connector, channel_tx);

        let runtime = ChatRuntime::new(
            state,
            Arc::new(api),
            store,
            channel.clone(),
            event_rx,
            event_tx.downgrade(),
            channel_rx,
            state_tx,
        );
        let task = tokio::spawn(runtime.run());

        Ok((
            Self {
                event_tx,
                state_rx,
                channel,
            },
            task,
        ))
    }

    /// Snapshot of the latest published state
    pub fn state(&self) -> ChatState {
        self.state_rx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChatState> {
        self.state_rx.clone()
    }

    /// Wait for the first published state matching `predicate`
    pub async fn wait_until(
        &self,
        mut predicate: impl FnMut(&ChatState) -> bool,
    ) -> Result<ChatState, HandleError> {
        let mut rx = self.state_rx.clone();
        let state = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| HandleError::Closed)?;
        Ok(state.clone())
    }

    async fn dispatch(&self, event: Event) -> Result<(), HandleError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| HandleError::Closed)
    }

    /// Queue a user message; the returned id can cancel it
    pub async fn send_message(
        &self,
        text: impl Into<String>,
        context: MessageContext,
    ) -> Result<RequestId, HandleError> {
        let text = text.into();
        validate_message(&text)?;
        let request_id = RequestId::new();
        self.dispatch(Event::UserMessage {
            request_id,
            text,
            context,
        })
        .await?;
        Ok(request_id)
    }

    pub async fn cancel(&self, request_id: RequestId) -> Result<(), HandleError> {
        self.dispatch(Event::CancelRequest { request_id }).await
    }

    /// Replace the visible messages with the stored exchanges of `session_id`
    pub async fn load_history(&self, session_id: impl Into<String>) -> Result<(), HandleError> {
        self.dispatch(Event::LoadHistory {
            session_id: session_id.into(),
        })
        .await
    }

    pub async fn clear_history(&self) -> Result<(), HandleError> {
        self.dispatch(Event::ClearHistory).await
    }

    pub async fn mark_all_read(&self) -> Result<(), HandleError> {
        self.dispatch(Event::MarkAllRead).await
    }

    pub async fn update_message(
        &self,
        id: MessageId,
        read: Option<bool>,
        metadata: Option<Value>,
    ) -> Result<(), HandleError> {
        self.dispatch(Event::UpdateMessage { id, read, metadata })
            .await
    }

    pub async fn set_session(&self, session: Session) -> Result<(), HandleError> {
        self.dispatch(Event::SetSession { session }).await
    }

    pub async fn update_session(
        &self,
        session_id: impl Into<String>,
        updates: Map<String, Value>,
    ) -> Result<(), HandleError> {
        self.dispatch(Event::UpdateSession {
            session_id: session_id.into(),
            updates,
        })
        .await
    }

    pub async fn end_session(&self) -> Result<(), HandleError> {
        self.dispatch(Event::EndSession).await
    }

    pub async fn refresh_sessions(&self) -> Result<(), HandleError> {
        self.dispatch(Event::RefreshSessions).await
    }

    pub async fn update_preferences(&self, patch: PreferencesPatch) -> Result<(), HandleError> {
        self.dispatch(Event::UpdatePreferences { patch }).await
    }

    /// Apply a config change after checking the result is still valid
    pub async fn update_config(&self, patch: ConfigPatch) -> Result<(), HandleError> {
        let mut candidate = self.state_rx.borrow().config().clone();
        candidate.apply(&patch);
        candidate.validate()?;
        self.dispatch(Event::UpdateConfig { patch }).await
    }

    /// Open the realtime channel. A refused handshake is returned here and
    /// still schedules reconnects when enabled.
    pub async fn connect(&self) -> Result<(), HandleError> {
        let url = self.state_rx.borrow().config().ws_url.clone();
        self.dispatch(Event::Connect).await?;
        self.channel.connect(&url).await?;
        Ok(())
    }

    /// Close the realtime channel and stop reconnecting
    pub async fn disconnect(&self) -> Result<(), HandleError> {
        self.dispatch(Event::Disconnect).await
    }

    /// Send one JSON frame over the open realtime channel
    pub async fn send_frame<T: Serialize + ?Sized>(&self, frame: &T) -> Result<(), HandleError> {
        self.channel.send(frame).await?;
        Ok(())
    }
}
