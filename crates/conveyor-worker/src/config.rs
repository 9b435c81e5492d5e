//! Worker configuration.

use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// How long to idle between polls when the queue is empty
    pub poll_interval: Duration,
    /// Handler timeout `T`; must be strictly less than the queue's
    /// visibility timeout `V` so an abandoned handler's message becomes
    /// redeliverable before a second lease could overlap
    pub handler_timeout: Duration,
    /// How many times to retry a record lookup that races submission
    pub record_lookup_retries: u32,
    /// Backoff between record lookup retries
    pub record_lookup_backoff: Duration,
    /// Graceful shutdown drain timeout
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            poll_interval: Duration::from_millis(500),
            handler_timeout: Duration::from_secs(300),
            record_lookup_retries: 5,
            record_lookup_backoff: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4),
            poll_interval: Duration::from_millis(
                std::env::var("WORKER_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            handler_timeout: Duration::from_secs(
                std::env::var("WORKER_HANDLER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            record_lookup_retries: std::env::var("WORKER_RECORD_LOOKUP_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            record_lookup_backoff: Duration::from_millis(
                std::env::var("WORKER_RECORD_LOOKUP_BACKOFF_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(100),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Enforce `T < V` against the queue's visibility timeout.
    pub fn validate(&self, visibility_timeout: Duration) -> WorkerResult<()> {
        if self.handler_timeout >= visibility_timeout {
            return Err(WorkerError::config_error(format!(
                "handler timeout {:?} must be less than the queue visibility timeout {:?}",
                self.handler_timeout, visibility_timeout
            )));
        }
        Ok(())
    }
}
