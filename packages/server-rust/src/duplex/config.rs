//! Duplex callback channel configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-session callback channel settings controlling backpressure and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Bounded mpsc channel capacity for pending callback frames per session.
    pub capacity: usize,
    /// Maximum time a push waits for room in a full channel.
    pub send_timeout_ms: u64,
}

impl ChannelConfig {
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            send_timeout_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_config_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.capacity, 64);
        assert_eq!(config.send_timeout(), Duration::from_secs(5));
    }
}
