use serde::{Deserialize, Serialize};

use crate::duplex::config::ChannelConfig;

/// Server-level configuration for the call pipeline.
///
/// Controls admission, call deadlines, simulated latency, transaction
/// lifetimes and background sweep intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Maximum number of calls executing at once. Further calls queue.
    pub max_concurrent_calls: u32,
    /// Upper bound on the time a call may wait for an admission slot.
    /// `None` waits indefinitely.
    pub admission_timeout_ms: Option<u64>,
    /// Deadline for an admitted call.
    pub default_call_timeout_ms: u64,
    /// How long `slow` blocks.
    pub slow_duration_ms: u64,
    /// Delay between two results pushed by `search`.
    pub search_push_interval_ms: u64,
    /// Lifetime of a transaction before it is aborted by the reaper.
    pub transaction_timeout_ms: u64,
    /// How long terminal transactions are remembered after commit/abort.
    pub transaction_retention_ms: u64,
    /// Interval between reaper sweeps.
    pub reaper_interval_ms: u64,
    /// Attach internal error detail to faults sent to clients.
    pub include_exception_detail: bool,
    /// Duplex callback channel settings.
    pub channel: ChannelConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 2,
            admission_timeout_ms: Some(60_000),
            default_call_timeout_ms: 60_000,
            slow_duration_ms: 5_000,
            search_push_interval_ms: 100,
            transaction_timeout_ms: 60_000,
            transaction_retention_ms: 30_000,
            reaper_interval_ms: 1_000,
            include_exception_detail: false,
            channel: ChannelConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_throttle_to_two_calls() {
        let config = ServerConfig::default();
        assert_eq!(config.max_concurrent_calls, 2);
        assert_eq!(config.slow_duration_ms, 5_000);
        assert!(!config.include_exception_detail);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{ "max_concurrent_calls": 8, "channel": { "capacity": 4 } }"#)
                .unwrap();
        assert_eq!(config.max_concurrent_calls, 8);
        assert_eq!(config.channel.capacity, 4);
        assert_eq!(config.default_call_timeout_ms, 60_000);
        assert_eq!(config.channel.send_timeout_ms, ChannelConfig::default().send_timeout_ms);
    }
}
