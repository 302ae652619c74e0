//! Worker configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Retries for a failed caption call before the window is marked failed
    pub caption_retries: u32,
    /// Base delay for caption retry backoff (doubles each attempt)
    pub caption_retry_delay: Duration,
    /// Base URL relative frame URIs are resolved against
    pub frame_base_url: Option<String>,
    /// How often a backend that is not ready re-runs model discovery
    pub discovery_interval: Duration,
    /// Capacity of the coordinator command channel
    pub command_buffer: usize,
    /// Capacity of the summary token channel
    pub summary_stream_buffer: usize,
    /// Capacity of the in-process update broadcast when Redis is not configured
    pub update_buffer: usize,
    /// Address for the Prometheus scrape endpoint; metrics are off when unset
    pub metrics_addr: Option<SocketAddr>,
    /// Graceful shutdown timeout for in-flight work
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            caption_retries: 2,
            caption_retry_delay: Duration::from_millis(500),
            frame_base_url: None,
            discovery_interval: Duration::from_secs(30),
            command_buffer: 1024,
            summary_stream_buffer: 256,
            update_buffer: 1024,
            metrics_addr: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            caption_retries: std::env::var("CAPTION_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            caption_retry_delay: Duration::from_millis(
                std::env::var("CAPTION_RETRY_BASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            frame_base_url: std::env::var("FRAME_BASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            discovery_interval: Duration::from_secs(
                std::env::var("MODEL_DISCOVERY_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            command_buffer: std::env::var("WORKER_COMMAND_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(1024),
            summary_stream_buffer: std::env::var("SUMMARY_STREAM_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(256),
            update_buffer: std::env::var("UPDATE_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(1024),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }
}
