//! reqwest-backed implementation of the chat API

use super::credentials::CredentialStore;
use super::error::{user_message_for, ApiError, ApiErrorKind};
use super::events::ApiEvent;
use super::types::{ChatRequest, ChatResponse, HealthStatus, HistoryEntry, SessionSummary};
use super::{ChatApi, RequestOptions};
use crate::config::{derive_ws_url, ClientConfig, ConfigError, DEFAULT_WS_PATH};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::io::ReaderStream;

/// Placeholder payload for calls without a body
const NO_BODY: Option<&()> = None;

pub struct HttpChatApi {
    client: Client,
    base_url: Url,
    credentials: Arc<dyn CredentialStore>,
    events: broadcast::Sender<ApiEvent>,
    default_timeout: Duration,
}

impl HttpChatApi {
    pub fn new(config: &ClientConfig, credentials: Arc<dyn CredentialStore>) -> Result<Self, ApiError> {
        let base_url = Url::parse(&config.api_url)
            .map_err(|e| ApiError::unknown(format!("Invalid API URL {}: {e}", config.api_url)))?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::unknown(format!("Failed to create HTTP client: {e}")))?;

        let (events, _) = broadcast::channel(64);

        Ok(Self {
            client,
            base_url,
            credentials,
            events,
            default_timeout: config.request_timeout,
        })
    }

    /// Observe auth, rate-limit and server-error notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ApiEvent> {
        self.events.subscribe()
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// WebSocket URL on the same host, `http` upgraded to `ws`
    pub fn websocket_url(&self, path: Option<&str>) -> Result<String, ConfigError> {
        derive_ws_url(self.base_url.as_str(), path.unwrap_or(DEFAULT_WS_PATH))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::unknown(format!("API URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.credentials.get() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Issue one request against `segments` under the API base and decode
    /// the JSON response.
    pub async fn call<B, T>(
        &self,
        method: Method,
        segments: &[&str],
        payload: Option<&B>,
        options: &RequestOptions,
    ) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(segments)?;
        let mut request = self
            .client
            .request(method.clone(), url)
            .timeout(options.timeout.unwrap_or(self.default_timeout));
        if let Some(body) = payload {
            request = request.json(body);
        }
        self.execute(self.authorize(request), &method, &segments.join("/"), options)
            .await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        method: &Method,
        endpoint: &str,
        options: &RequestOptions,
    ) -> Result<T, ApiError> {
        let start = Instant::now();

        let exchange = async {
            let response = request.send().await.map_err(classify_transport_error)?;
            let status = response.status();
            let retry_after = parse_retry_after(response.headers());
            let text = response
                .text()
                .await
                .map_err(|e| ApiError::network(format!("Failed to read response: {e}")))?;

            if !status.is_success() {
                return Err(self.classify_failure(status.as_u16(), &text, retry_after));
            }

            let value: Value = if text.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&text)
                    .map_err(|e| ApiError::unknown(format!("Failed to parse response: {e} - body: {text}")))?
            };
            serde_json::from_value::<T>(value)
                .map_err(|e| ApiError::unknown(format!("Unexpected response shape: {e}")))
        };

        let result = match &options.cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => Err(ApiError::canceled()),
                result = exchange => result,
            },
            None => exchange.await,
        };

        let duration = start.elapsed();
        match &result {
            Ok(_) => {
                tracing::info!(
                    %method,
                    endpoint,
                    duration_ms = %duration.as_millis(),
                    "API request completed"
                );
            }
            Err(e) if e.is_canceled() => {
                tracing::debug!(%method, endpoint, "API request canceled");
            }
            Err(e) => {
                tracing::warn!(
                    %method,
                    endpoint,
                    duration_ms = %duration.as_millis(),
                    status = ?e.status,
                    kind = ?e.kind,
                    error = %e.message,
                    "API request failed"
                );
            }
        }
        result
    }

    /// Turn a non-success status into an `ApiError`, running the side
    /// effects tied to that status first.
    fn classify_failure(&self, status: u16, text: &str, retry_after: Option<Duration>) -> ApiError {
        let body: Option<Value> = serde_json::from_str(text).ok();
        let kind = ApiErrorKind::from_status(status);
        let mut err = ApiError::new(kind, format!("HTTP {status}: {text}"))
            .with_status(status)
            .with_user_message(user_message_for(status, body.as_ref()));

        match kind {
            ApiErrorKind::Unauthorized => {
                self.credentials.clear();
                let _ = self.events.send(ApiEvent::Unauthorized);
            }
            ApiErrorKind::Forbidden => {
                let _ = self.events.send(ApiEvent::Forbidden);
            }
            ApiErrorKind::RateLimited => {
                if let Some(delay) = retry_after {
                    err = err.with_retry_after(delay);
                }
                let _ = self.events.send(ApiEvent::RateLimit { retry_after });
            }
            ApiErrorKind::ServerError => {
                tracing::error!(status, body = %text, "Server error");
                let _ = self.events.send(ApiEvent::ServerError {
                    status,
                    payload: body.clone(),
                });
            }
            _ => {}
        }

        match body {
            Some(body) => err.with_body(body),
            None => err,
        }
    }

    /// Health probe that folds every failure into `false`
    pub async fn test_connection(&self) -> bool {
        self.health_check(&RequestOptions::default()).await.is_ok()
    }

    /// Multipart upload of a local file as field `file`. `on_progress`
    /// receives the rounded percentage of bytes handed to the connection.
    pub async fn upload_file<F>(
        &self,
        path: &Path,
        on_progress: F,
        options: &RequestOptions,
    ) -> Result<Value, ApiError>
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| ApiError::unknown(format!("Failed to open {}: {e}", path.display())))?;
        let total = file
            .metadata()
            .await
            .map_err(|e| ApiError::unknown(format!("Failed to stat {}: {e}", path.display())))?
            .len();

        let file_name = path
            .file_name()
            .map_or_else(|| "upload".to_string(), |n| n.to_string_lossy().into_owned());
        let mime = mime_guess::from_path(path).first_or_octet_stream();

        let mut sent = 0u64;
        let stream = ReaderStream::new(file).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                on_progress(progress_percent(sent, total));
            }
            chunk
        });

        let part = Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(file_name)
            .mime_str(mime.as_ref())
            .map_err(|e| ApiError::unknown(format!("Invalid upload content type: {e}")))?;

        let url = self.endpoint(&["chat", "upload"])?;
        let request = self
            .client
            .post(url)
            .multipart(Form::new().part("file", part))
            .timeout(options.timeout.unwrap_or(self.default_timeout));

        self.execute(self.authorize(request), &Method::POST, "chat/upload", options)
            .await
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn send_message(
        &self,
        request: &ChatRequest,
        options: &RequestOptions,
    ) -> Result<ChatResponse, ApiError> {
        self.call(Method::POST, &["chat", "message"], Some(request), options)
            .await
    }

    async fn send_demo_message(
        &self,
        request: &ChatRequest,
        options: &RequestOptions,
    ) -> Result<ChatResponse, ApiError> {
        self.call(Method::POST, &["chat", "public", "demo"], Some(request), options)
            .await
    }

    async fn history(
        &self,
        session_id: &str,
        options: &RequestOptions,
    ) -> Result<Vec<HistoryEntry>, ApiError> {
        self.call(Method::GET, &["chat", "history", session_id], NO_BODY, options)
            .await
    }

    async fn sessions(&self, options: &RequestOptions) -> Result<Vec<SessionSummary>, ApiError> {
        self.call(Method::GET, &["chat", "sessions"], NO_BODY, options)
            .await
    }

    async fn end_session(&self, session_id: &str, options: &RequestOptions) -> Result<(), ApiError> {
        let _: Value = self
            .call(Method::POST, &["chat", "session", session_id, "end"], NO_BODY, options)
            .await?;
        Ok(())
    }

    async fn clear_history(&self, session_id: &str, options: &RequestOptions) -> Result<(), ApiError> {
        let _: Value = self
            .call(
                Method::DELETE,
                &["chat", "session", session_id, "history"],
                NO_BODY,
                options,
            )
            .await?;
        Ok(())
    }

    async fn health_check(&self, options: &RequestOptions) -> Result<HealthStatus, ApiError> {
        self.call(Method::GET, &["chat", "health"], NO_BODY, options)
            .await
    }
}

fn classify_transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::network(format!("Request timeout: {e}"))
    } else if e.is_connect() || e.is_request() {
        ApiError::network(format!("Connection failed: {e}"))
    } else {
        ApiError::unknown(format!("Request failed: {e}"))
    }
}

/// `Retry-After` is either delta-seconds or an HTTP-date. Values that do
/// not fit a `Duration` are dropped.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }
    let when = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let delta = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Rounded percentage of `sent` over `total`, capped at 100
pub fn progress_percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (u128::from(sent) * 100 + u128::from(total) / 2) / u128::from(total);
    u8::try_from(pct.min(100)).unwrap_or(100)
}
