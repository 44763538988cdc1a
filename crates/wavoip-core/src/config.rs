//! Session configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables shared by every device session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long to wait for a command acknowledgment (ms)
    pub ack_timeout_ms: u64,
    /// Capacity of the outbound request channel
    pub request_buffer: usize,
    /// Capacity of the inbound push channel
    pub push_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 10_000,
            request_buffer: 32,
            push_buffer: 64,
        }
    }
}

impl SessionConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}
