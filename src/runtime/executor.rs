//! Chat runtime executor

use crate::persistence::{PersistenceStore, PREFERENCES_KEY, SESSIONS_KEY};
use crate::realtime::{ChannelEvent, RealtimeChannel};
use crate::state_machine::{transition, ChatState, Effect, Event, RequestId};
use crate::transport::{ChatApi, RequestOptions};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns the chat state and carries out the effects of each transition
pub struct ChatRuntime<A, S>
where
    A: ChatApi + 'static,
    S: PersistenceStore + 'static,
{
    state: ChatState,
    api: Arc<A>,
    store: S,
    channel: RealtimeChannel,
    event_rx: mpsc::Receiver<Event>,
    /// Weak so the loop ends once every handle is gone
    event_tx: mpsc::WeakSender<Event>,
    channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    state_tx: watch::Sender<ChatState>,
    /// Cancellation tokens of message requests still in flight
    in_flight: HashMap<RequestId, CancellationToken>,
    reconnect_timer: Option<JoinHandle<()>>,
    typing_timer: Option<JoinHandle<()>>,
}

impl<A, S> ChatRuntime<A, S>
where
    A: ChatApi + 'static,
    S: PersistenceStore + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: ChatState,
        api: Arc<A>,
        store: S,
        channel: RealtimeChannel,
        event_rx: mpsc::Receiver<Event>,
        event_tx: mpsc::WeakSender<Event>,
        channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
        state_tx: watch::Sender<ChatState>,
    ) -> Self {
        Self {
            state,
            api,
            store,
            channel,
            event_rx,
            event_tx,
            channel_rx,
            state_tx,
            in_flight: HashMap::new(),
            reconnect_timer: None,
            typing_timer: None,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            sessions = self.state.session_history().len(),
            "Starting chat runtime"
        );

        loop {
            tokio::select! {
                // Caller events first: a Connect must be seen before the
                // channel events its handshake produces
                biased;

                event = self.event_rx.recv() => match event {
                    Some(event) => self.process_event(event).await,
                    None => break,
                },
                Some(event) = self.channel_rx.recv() => {
                    self.process_event(Event::Channel(event)).await;
                }
            }
        }

        self.shutdown().await;
        tracing::info!("Chat runtime stopped");
    }

    async fn process_event(&mut self, event: Event) {
        if let Event::MessageResponse { request_id, .. } | Event::MessageFailed { request_id, .. } =
            &event
        {
            self.in_flight.remove(request_id);
        }

        let result = match transition(&self.state, Utc::now(), event) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "Event rejected");
                return;
            }
        };

        self.state = result.new_state;
        for effect in result.effects {
            self.execute_effect(effect).await;
        }

        // Published after persistence so watchers never see unsaved state
        self.state_tx.send_replace(self.state.clone());
    }

    #[allow(clippy::too_many_lines)]
    async fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::PostMessage {
                request_id,
                request,
                demo,
            } => {
                let cancel = CancellationToken::new();
                self.in_flight.insert(request_id, cancel.clone());
                let options = RequestOptions {
                    cancel: Some(cancel),
                    timeout: Some(self.state.config().request_timeout),
                };
                let api = self.api.clone();
                let event_tx = self.event_tx.clone();

                tokio::spawn(async move {
                    let started = Instant::now();
                    let result = if demo {
                        api.send_demo_message(&request, &options).await
                    } else {
                        api.send_message(&request, &options).await
                    };
                    let duration = started.elapsed();
                    let event = match result {
                        Ok(response) => {
                            tracing::info!(
                                request_id = %request_id,
                                duration_ms = %duration.as_millis(),
                                "Chat message answered"
                            );
                            Event::MessageResponse {
                                request_id,
                                response,
                            }
                        }
                        Err(error) => {
                            tracing::warn!(
                                request_id = %request_id,
                                duration_ms = %duration.as_millis(),
                                kind = ?error.kind,
                                error = %error,
                                "Chat message failed"
                            );
                            Event::MessageFailed { request_id, error }
                        }
                    };
                    emit(&event_tx, event).await;
                });
            }

            Effect::AbortRequest { request_id } => {
                if let Some(cancel) = self.in_flight.remove(&request_id) {
                    tracing::info!(request_id = %request_id, "Cancelling chat message");
                    cancel.cancel();
                }
            }

            Effect::FetchHistory { session_id } => {
                let options = self.request_options();
                self.spawn_call(|api| async move {
                    match api.history(&session_id, &options).await {
                        Ok(entries) => Event::HistoryLoaded {
                            session_id,
                            entries,
                        },
                        Err(error) => Event::HistoryFailed { session_id, error },
                    }
                });
            }

            Effect::DeleteHistory { session_id } => {
                let options = self.request_options();
                self.spawn_call(|api| async move {
                    match api.clear_history(&session_id, &options).await {
                        Ok(()) => Event::HistoryCleared { session_id },
                        Err(error) => Event::ClearHistoryFailed { session_id, error },
                    }
                });
            }

            Effect::EndSession { session_id } => {
                let options = self.request_options();
                self.spawn_call(|api| async move {
                    match api.end_session(&session_id, &options).await {
                        Ok(()) => Event::SessionEnded { session_id },
                        Err(error) => Event::RequestFailed {
                            operation: "end_session",
                            error,
                        },
                    }
                });
            }

            Effect::FetchSessions => {
                let options = self.request_options();
                self.spawn_call(|api| async move {
                    match api.sessions(&options).await {
                        Ok(sessions) => Event::SessionsLoaded { sessions },
                        Err(error) => Event::RequestFailed {
                            operation: "sessions",
                            error,
                        },
                    }
                });
            }

            Effect::OpenChannel { url } => {
                let channel = self.channel.clone();
                tokio::spawn(async move {
                    // Failures arrive as channel events
                    if let Err(e) = channel.connect(&url).await {
                        tracing::debug!(error = %e, "Reconnect attempt failed");
                    }
                });
            }

            Effect::CloseChannel => self.channel.disconnect().await,

            Effect::ScheduleReconnect { delay, attempt } => {
                tracing::info!(
                    attempt,
                    delay_ms = %delay.as_millis(),
                    "Scheduling reconnect"
                );
                abort(self.reconnect_timer.take());
                self.reconnect_timer =
                    Some(self.spawn_timer(delay, Event::ReconnectTimer { attempt }));
            }

            Effect::CancelReconnect => abort(self.reconnect_timer.take()),

            Effect::ScheduleTypingClear { delay, generation } => {
                abort(self.typing_timer.take());
                self.typing_timer =
                    Some(self.spawn_timer(delay, Event::TypingTimeout { generation }));
            }

            Effect::CancelTypingClear => abort(self.typing_timer.take()),

            Effect::PersistSessions { sessions } => self.persist(SESSIONS_KEY, &sessions).await,

            Effect::PersistPreferences { preferences } => {
                self.persist(PREFERENCES_KEY, &preferences).await;
            }
        }
    }

    fn request_options(&self) -> RequestOptions {
        RequestOptions {
            cancel: None,
            timeout: Some(self.state.config().request_timeout),
        }
    }

    /// Run an API call in the background and feed its outcome back as an event
    fn spawn_call<F, Fut>(&self, call: F)
    where
        F: FnOnce(Arc<A>) -> Fut,
        Fut: Future<Output = Event> + Send + 'static,
    {
        let event_tx = self.event_tx.clone();
        let fut = call(self.api.clone());
        tokio::spawn(async move {
            let event = fut.await;
            if let Event::RequestFailed { operation, error } = &event {
                tracing::warn!(operation, error = %error, "Chat API call failed");
            }
            emit(&event_tx, event).await;
        });
    }

    fn spawn_timer(&self, delay: Duration, event: Event) -> JoinHandle<()> {
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            emit(&event_tx, event).await;
        })
    }

    async fn persist<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to encode persisted value");
                return;
            }
        };
        if let Err(e) = self.store.save(key, &value).await {
            tracing::warn!(key, error = %e, "Failed to persist value");
        }
    }

    async fn shutdown(&mut self) {
        for (_, cancel) in self.in_flight.drain() {
            cancel.cancel();
        }
        abort(self.reconnect_timer.take());
        abort(self.typing_timer.take());
        self.channel.disconnect().await;
    }
}

/// Deliver an event if the runtime is still running
async fn emit(event_tx: &mpsc::WeakSender<Event>, event: Event) {
    if let Some(tx) = event_tx.upgrade() {
        let _ = tx.send(event).await;
    }
}

fn abort(timer: Option<JoinHandle<()>>) {
    if let Some(timer) = timer {
        timer.abort();
    }
}
