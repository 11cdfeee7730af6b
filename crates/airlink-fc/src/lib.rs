pub mod link;
pub mod mav;
pub mod state;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    /// Telemetry source address in MAVLink connection URL form.
    /// Examples: "udpin:0.0.0.0:14557", "tcpout:fc.local:5760",
    /// "serial:/dev/ttyACM0:57600".
    pub url: String,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Bounds for the reconnect backoff. Delay starts at `initial_backoff_ms`,
/// doubles per consecutive failure, and never exceeds `max_backoff_ms`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self { initial_backoff_ms: 1_000, max_backoff_ms: 30_000 }
    }
}
