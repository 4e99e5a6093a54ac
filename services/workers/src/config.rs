//! Configuration for the cover worker process.

use std::time::Duration;

use anyhow::Result;

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Fleet registry endpoint.
    pub registry_url: String,

    /// Work queue endpoint. When unset the process runs against an
    /// in-memory queue (local development).
    pub queue_url: Option<String>,

    /// Tick interval for singleton tasks.
    pub tick_interval: Duration,

    /// Worker loop backoff when the queue is empty.
    pub queue_backoff: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let registry_url = std::env::var("COVER_REGISTRY_URL")
            .unwrap_or_else(|_| cover_fleet::DEFAULT_REGISTRY_URL.to_string());

        let queue_url = std::env::var("COVER_QUEUE_URL")
            .ok()
            .filter(|v| !v.is_empty());

        let tick_interval_secs = std::env::var("COVER_TICK_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let queue_backoff_ms = std::env::var("COVER_QUEUE_BACKOFF_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5_000);

        let log_level = std::env::var("COVER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            registry_url,
            queue_url,
            tick_interval: Duration::from_secs(tick_interval_secs),
            queue_backoff: Duration::from_millis(queue_backoff_ms),
            log_level,
        })
    }
}
