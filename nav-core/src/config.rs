//! Runtime configuration, overridable through environment variables.

use std::time::Duration;

/// Tunables for the tracking connection and the navigation controller.
///
/// `Default` reads the `NAV_*` environment variables so embedders can
/// retune a deployment without a rebuild.
#[derive(Debug, Clone)]
pub struct NavConfig {
    /// WebSocket URL of the streaming position source.
    pub server_url: String,
    /// Capacity of the inbound sample/status queue. On overflow the oldest
    /// entries are dropped first.
    pub sample_queue: usize,
    /// How long to wait for the server hello after the socket opens.
    pub handshake_timeout: Duration,
    /// Fixed interval at which changed viewport geometry is re-resolved
    /// into a tool center.
    pub center_interval: Duration,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            server_url: std::env::var("NAV_SERVER_URL")
                .unwrap_or_else(|_| "ws://127.0.0.1:8765".to_string()),
            sample_queue: std::env::var("NAV_SAMPLE_QUEUE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(256),
            handshake_timeout: Duration::from_millis(
                std::env::var("NAV_HANDSHAKE_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5000),
            ),
            center_interval: Duration::from_millis(
                std::env::var("NAV_CENTER_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(100),
            ),
        }
    }
}
