//! Client configuration and user preferences
//!
//! `ClientConfig` is built once (usually from the environment) and handed to
//! the runtime. Both it and `Preferences` can be merge-patched later through
//! the state machine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_WS_PATH: &str = "/ws";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("API URL must start with http:// or https://, got {0}")]
    InvalidApiUrl(String),
    #[error("WebSocket URL must start with ws:// or wss://, got {0}")]
    InvalidWsUrl(String),
    #[error("Message retention must be at least 1")]
    ZeroRetention,
}

/// Connection and behaviour settings for the chat client
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_url: String,
    pub ws_url: String,
    pub auto_reconnect: bool,
    /// How long a `typing` indicator stays on without a newer event
    pub typing_timeout: Duration,
    /// Max messages kept in memory; oldest trimmed first
    pub message_retention: usize,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub request_timeout: Duration,
    /// Route chat messages to the unauthenticated demo endpoint
    pub demo_mode: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::for_api_url(DEFAULT_API_URL)
    }
}

impl ClientConfig {
    /// Defaults with the WebSocket URL derived from `api_url`
    pub fn for_api_url(api_url: impl Into<String>) -> Self {
        let api_url = api_url.into();
        let ws_url = derive_ws_url(&api_url, DEFAULT_WS_PATH)
            .unwrap_or_else(|_| format!("ws://localhost:8080/api{DEFAULT_WS_PATH}"));
        Self {
            api_url,
            ws_url,
            auto_reconnect: true,
            typing_timeout: Duration::from_millis(3000),
            message_retention: 100,
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(30),
            demo_mode: false,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = std::env::var("CHAT_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let mut config = Self::for_api_url(api_url);

        if let Ok(ws_url) = std::env::var("CHAT_WS_URL") {
            config.ws_url = ws_url;
        }
        if let Some(v) = env_parse::<bool>("CHAT_AUTO_RECONNECT") {
            config.auto_reconnect = v;
        }
        if let Some(ms) = env_parse::<u64>("CHAT_TYPING_TIMEOUT_MS") {
            config.typing_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<usize>("CHAT_MESSAGE_RETENTION") {
            config.message_retention = n;
        }
        if let Some(n) = env_parse::<u32>("CHAT_MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = n;
        }
        if let Some(ms) = env_parse::<u64>("CHAT_REQUEST_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = env_parse::<bool>("CHAT_DEMO_MODE") {
            config.demo_mode = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::InvalidApiUrl(self.api_url.clone()));
        }
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidWsUrl(self.ws_url.clone()));
        }
        if self.message_retention == 0 {
            return Err(ConfigError::ZeroRetention);
        }
        Ok(())
    }

    /// Apply a partial update; absent fields keep their current value
    pub fn apply(&mut self, patch: &ConfigPatch) {
        if let Some(v) = &patch.api_url {
            self.api_url.clone_from(v);
        }
        if let Some(v) = &patch.ws_url {
            self.ws_url.clone_from(v);
        }
        if let Some(v) = patch.auto_reconnect {
            self.auto_reconnect = v;
        }
        if let Some(v) = patch.typing_timeout {
            self.typing_timeout = v;
        }
        if let Some(v) = patch.message_retention {
            // Zero would drop every message on insert
            self.message_retention = v.max(1);
        }
        if let Some(v) = patch.max_reconnect_attempts {
            self.max_reconnect_attempts = v;
        }
        if let Some(v) = patch.request_timeout {
            self.request_timeout = v;
        }
        if let Some(v) = patch.demo_mode {
            self.demo_mode = v;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable config value");
            None
        }
    }
}

/// Build the WebSocket URL for an HTTP base: `http` becomes `ws`, `https`
/// becomes `wss`, and `path` is appended.
pub fn derive_ws_url(api_url: &str, path: &str) -> Result<String, ConfigError> {
    let upgraded = if let Some(rest) = api_url.strip_prefix("https") {
        format!("wss{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http") {
        format!("ws{rest}")
    } else {
        return Err(ConfigError::InvalidApiUrl(api_url.to_string()));
    };
    Ok(format!("{}{path}", upgraded.trim_end_matches('/')))
}

/// Partial `ClientConfig` update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigPatch {
    pub api_url: Option<String>,
    pub ws_url: Option<String>,
    pub auto_reconnect: Option<bool>,
    pub typing_timeout: Option<Duration>,
    pub message_retention: Option<usize>,
    pub max_reconnect_attempts: Option<u32>,
    pub request_timeout: Option<Duration>,
    pub demo_mode: Option<bool>,
}

/// User-facing widget preferences, persisted under `chatPreferences`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub theme: String,
    pub language: String,
    pub notifications: bool,
    pub sound_enabled: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: "default".to_string(),
            language: "en".to_string(),
            notifications: true,
            sound_enabled: true,
        }
    }
}

impl Preferences {
    pub fn apply(&mut self, patch: &PreferencesPatch) {
        if let Some(v) = &patch.theme {
            self.theme.clone_from(v);
        }
        if let Some(v) = &patch.language {
            self.language.clone_from(v);
        }
        if let Some(v) = patch.notifications {
            self.notifications = v;
        }
        if let Some(v) = patch.sound_enabled {
            self.sound_enabled = v;
        }
    }

    /// JSON object form, as sent in `userPreferences`
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notifications: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound_enabled: Option<bool>,
}
