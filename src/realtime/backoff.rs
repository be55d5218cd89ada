use crate::config::ClientConfig;
use std::time::Duration;

/// When to reconnect after the socket closes on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub auto_reconnect: bool,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            auto_reconnect: config.auto_reconnect,
            max_attempts: config.max_reconnect_attempts,
            base_delay: config.reconnect_base_delay,
        }
    }

    /// Delay before the next attempt, or `None` once reconnecting should
    /// stop. The delay scales with the attempts already made, so the first
    /// reconnect after a fresh open is immediate.
    pub fn next_delay(&self, attempts_so_far: u32) -> Option<Duration> {
        if !self.auto_reconnect || attempts_so_far >= self.max_attempts {
            return None;
        }
        Some(self.base_delay * attempts_so_far)
    }
}
