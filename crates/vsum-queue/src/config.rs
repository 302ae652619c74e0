//! Queue and sink configuration.

use std::time::Duration;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL for update publishing and checkpoints; in-process sinks are used when unset
    pub redis_url: Option<String>,
    /// Prefix for Redis channel and key names
    pub key_prefix: String,
    /// Maximum in-flight caption calls across all videos
    pub caption_concurrency: usize,
    /// Maximum in-flight summaries across all videos
    pub summary_concurrency: usize,
    /// Period of the scheduling tick
    pub tick_interval: Duration,
    /// Directory for JSON checkpoints when Redis is not configured
    pub checkpoint_dir: Option<String>,
    /// Expiry for Redis checkpoints (none when zero)
    pub checkpoint_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "vsum".to_string(),
            caption_concurrency: 4,
            summary_concurrency: 2,
            tick_interval: Duration::from_millis(250),
            checkpoint_dir: None,
            checkpoint_ttl: Duration::ZERO,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX").unwrap_or_else(|_| "vsum".to_string()),
            caption_concurrency: std::env::var("VLM_CONCURRENT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4),
            summary_concurrency: std::env::var("LLM_CONCURRENT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            tick_interval: Duration::from_millis(
                std::env::var("QUEUE_TICK_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(250),
            ),
            checkpoint_dir: std::env::var("CHECKPOINT_DIR").ok().filter(|s| !s.is_empty()),
            checkpoint_ttl: Duration::from_secs(
                std::env::var("CHECKPOINT_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
            ),
        }
    }
}
