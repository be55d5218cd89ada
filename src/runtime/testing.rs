//! Mock implementations for testing
//!
//! These mocks enable runtime tests without real I/O.

use crate::realtime::{ChannelError, Connector, FrameSink, FrameStream, WireFrame};
use crate::transport::{
    ApiError, ChatApi, ChatRequest, ChatResponse, HealthStatus, HistoryEntry, RequestOptions,
    SessionSummary,
};
use async_trait::async_trait;
use futures::channel::mpsc as futures_mpsc;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Mock Chat API
// ============================================================================

/// Chat API that answers from queues and records every request
#[derive(Default)]
pub struct MockChatApi {
    replies: Mutex<VecDeque<Result<ChatResponse, ApiError>>>,
    histories: Mutex<VecDeque<Result<Vec<HistoryEntry>, ApiError>>>,
    session_lists: Mutex<VecDeque<Result<Vec<SessionSummary>, ApiError>>>,
    acks: Mutex<VecDeque<Result<(), ApiError>>>,
    /// Sent chat requests, with `true` for the demo endpoint
    pub requests: Mutex<Vec<(bool, ChatRequest)>>,
    /// Every endpoint hit, e.g. `history:s1`
    pub calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
    /// Notified (one permit) when a chat request starts
    pub request_started: Arc<Notify>,
}

impl MockChatApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every chat request for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queue_reply(&self, response: ChatResponse) {
        self.replies.lock().unwrap().push_back(Ok(response));
    }

    pub fn queue_reply_error(&self, error: ApiError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn queue_history(&self, result: Result<Vec<HistoryEntry>, ApiError>) {
        self.histories.lock().unwrap().push_back(result);
    }

    pub fn queue_sessions(&self, result: Result<Vec<SessionSummary>, ApiError>) {
        self.session_lists.lock().unwrap().push_back(result);
    }

    /// Result of the next end-session or clear-history call
    pub fn queue_ack(&self, result: Result<(), ApiError>) {
        self.acks.lock().unwrap().push_back(result);
    }

    pub fn recorded_requests(&self) -> Vec<(bool, ChatRequest)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn recorded_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn reply(
        &self,
        demo: bool,
        request: &ChatRequest,
        options: &RequestOptions,
    ) -> Result<ChatResponse, ApiError> {
        self.requests.lock().unwrap().push((demo, request.clone()));
        self.record(if demo { "demo" } else { "message" }.to_string());
        self.request_started.notify_one();

        if let Some(delay) = self.delay {
            match &options.cancel {
                Some(token) => tokio::select! {
                    biased;
                    () = token.cancelled() => return Err(ApiError::canceled()),
                    () = tokio::time::sleep(delay) => {}
                },
                None => tokio::time::sleep(delay).await,
            }
        }

        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::network("No mock reply queued")))
    }

    fn next_ack(&self) -> Result<(), ApiError> {
        self.acks.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

#[async_trait]
impl ChatApi for MockChatApi {
    async fn send_message(
        &self,
        request: &ChatRequest,
        options: &RequestOptions,
    ) -> Result<ChatResponse, ApiError> {
        self.reply(false, request, options).await
    }

    async fn send_demo_message(
        &self,
        request: &ChatRequest,
        options: &RequestOptions,
    ) -> Result<ChatResponse, ApiError> {
        self.reply(true, request, options).await
    }

    async fn history(
        &self,
        session_id: &str,
        _options: &RequestOptions,
    ) -> Result<Vec<HistoryEntry>, ApiError> {
        self.record(format!("history:{session_id}"));
        self.histories
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn sessions(&self, _options: &RequestOptions) -> Result<Vec<SessionSummary>, ApiError> {
        self.record("sessions".to_string());
        self.session_lists
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn end_session(&self, session_id: &str, _options: &RequestOptions) -> Result<(), ApiError> {
        self.record(format!("end:{session_id}"));
        self.next_ack()
    }

    async fn clear_history(&self, session_id: &str, _options: &RequestOptions) -> Result<(), ApiError> {
        self.record(format!("clear:{session_id}"));
        self.next_ack()
    }

    async fn health_check(&self, _options: &RequestOptions) -> Result<HealthStatus, ApiError> {
        self.record("health".to_string());
        Ok(HealthStatus {
            status: "healthy".to_string(),
            ..Default::default()
        })
    }
}

// ============================================================================
// Mock Connector
// ============================================================================

/// Server side of an in-memory socket
pub struct MockSocket {
    to_client: futures_mpsc::UnboundedSender<Result<WireFrame, ChannelError>>,
    from_client: Mutex<futures_mpsc::UnboundedReceiver<String>>,
}

impl MockSocket {
    /// Deliver a text frame to the client
    pub fn push(&self, text: &str) {
        let _ = self
            .to_client
            .unbounded_send(Ok(WireFrame::Text(text.to_string())));
    }

    /// Close from the server side
    pub fn close(&self) {
        let _ = self.to_client.unbounded_send(Ok(WireFrame::Close));
    }

    /// Frames the client has sent so far
    pub fn sent(&self) -> Vec<String> {
        let mut rx = self.from_client.lock().unwrap();
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = rx.try_next() {
            frames.push(frame);
        }
        frames
    }
}

/// Connector whose attempts succeed or fail from a script; with an empty
/// script every attempt is refused
#[derive(Default)]
pub struct MockConnector {
    outcomes: Mutex<VecDeque<bool>>,
    sockets: Mutex<Vec<Arc<MockSocket>>>,
    /// URLs of every attempt
    pub attempts: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_accept(&self) {
        self.outcomes.lock().unwrap().push_back(true);
    }

    pub fn queue_refuse(&self) {
        self.outcomes.lock().unwrap().push_back(false);
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// Most recently accepted socket
    pub fn last_socket(&self) -> Option<Arc<MockSocket>> {
        self.sockets.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), ChannelError> {
        self.attempts.lock().unwrap().push(url.to_string());
        let accept = self.outcomes.lock().unwrap().pop_front().unwrap_or(false);
        if !accept {
            return Err(ChannelError::Connect("connection refused".to_string()));
        }

        let (to_client, client_rx) = futures_mpsc::unbounded();
        let (client_tx, from_client) = futures_mpsc::unbounded::<String>();
        self.sockets.lock().unwrap().push(Arc::new(MockSocket {
            to_client,
            from_client: Mutex::new(from_client),
        }));

        let sink = client_tx.sink_map_err(|e| ChannelError::Send(e.to_string()));
        Ok((Box::pin(sink), Box::pin(client_rx.fuse())))
    }
}
