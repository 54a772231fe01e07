//! Gateway server configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum concurrent trade sockets.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Outbound frames buffered per session before it counts as a slow consumer.
    #[serde(default = "default_session_queue_capacity")]
    pub session_queue_capacity: usize,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_max_missed")]
    pub heartbeat_max_missed: u32,
    /// Directory with the browser UI, served at `/` when set.
    #[serde(default)]
    pub static_dir: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_connections() -> usize {
    100
}

fn default_session_queue_capacity() -> usize {
    256
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_max_missed() -> u32 {
    2
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            session_queue_capacity: default_session_queue_capacity(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_max_missed: default_heartbeat_max_missed(),
            static_dir: None,
        }
    }
}

impl GatewayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}
