//! HTTP transport for the chat backend
//!
//! `ChatApi` is the seam the runtime talks through; `HttpChatApi` is the
//! reqwest implementation, tests substitute mocks.

mod credentials;
mod error;
mod events;
mod http;
pub mod retry;
mod types;

pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::{ApiError, ApiErrorKind, GENERIC_USER_MESSAGE, NETWORK_USER_MESSAGE};
pub use events::ApiEvent;
pub use http::{progress_percent, HttpChatApi};
pub use types::{
    ChatRequest, ChatResponse, HealthStatus, HistoryEntry, MessageContext, SessionSummary,
};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-call knobs
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Aborts the call with `ApiErrorKind::Canceled` when triggered
    pub cancel: Option<CancellationToken>,
    /// Overrides the client-wide request timeout
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn cancellable(token: CancellationToken) -> Self {
        Self {
            cancel: Some(token),
            timeout: None,
        }
    }
}

/// Endpoints of the chat backend
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// `POST /chat/message`
    async fn send_message(
        &self,
        request: &ChatRequest,
        options: &RequestOptions,
    ) -> Result<ChatResponse, ApiError>;

    /// `POST /chat/public/demo`, no authentication required
    async fn send_demo_message(
        &self,
        request: &ChatRequest,
        options: &RequestOptions,
    ) -> Result<ChatResponse, ApiError>;

    async fn history(
        &self,
        session_id: &str,
        options: &RequestOptions,
    ) -> Result<Vec<HistoryEntry>, ApiError>;

    async fn sessions(&self, options: &RequestOptions) -> Result<Vec<SessionSummary>, ApiError>;

    async fn end_session(&self, session_id: &str, options: &RequestOptions) -> Result<(), ApiError>;

    async fn clear_history(&self, session_id: &str, options: &RequestOptions) -> Result<(), ApiError>;

    async fn health_check(&self, options: &RequestOptions) -> Result<HealthStatus, ApiError>;
}

#[async_trait]
impl<T: ChatApi + ?Sized> ChatApi for Arc<T> {
    async fn send_message(
        &self,
        request: &ChatRequest,
        options: &RequestOptions,
    ) -> Result<ChatResponse, ApiError> {
        (**self).send_message(request, options).await
    }

    async fn send_demo_message(
        &self,
        request: &ChatRequest,
        options: &RequestOptions,
    ) -> Result<ChatResponse, ApiError> {
        (**self).send_demo_message(request, options).await
    }

    async fn history(
        &self,
        session_id: &str,
        options: &RequestOptions,
    ) -> Result<Vec<HistoryEntry>, ApiError> {
        (**self).history(session_id, options).await
    }

    async fn sessions(&self, options: &RequestOptions) -> Result<Vec<SessionSummary>, ApiError> {
        (**self).sessions(options).await
    }

    async fn end_session(&self, session_id: &str, options: &RequestOptions) -> Result<(), ApiError> {
        (**self).end_session(session_id, options).await
    }

    async fn clear_history(&self, session_id: &str, options: &RequestOptions) -> Result<(), ApiError> {
        (**self).clear_history(session_id, options).await
    }

    async fn health_check(&self, options: &RequestOptions) -> Result<HealthStatus, ApiError> {
        (**self).health_check(options).await
    }
}
