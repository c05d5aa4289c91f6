use serde::{Deserialize, Serialize};

/// How an endpoint reaches the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// `ws://` or `wss://` URL of the broker.
    pub url: String,
    /// Give up on a single connection attempt after this many seconds.
    pub connect_timeout_secs: u64,
    /// WebSocket ping interval.
    pub heartbeat_interval_secs: u64,
    /// Initial reconnect delay; doubles after each failure.
    pub reconnect_delay_secs: u64,
    pub max_reconnect_delay_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".into(),
            connect_timeout_secs: 15,
            heartbeat_interval_secs: 25,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
        }
    }
}
