//! Application state.

use std::sync::Arc;

use conveyor_queue::{Queue, QueueConfig, RedisQueue};
use conveyor_status::{RedisStatusStore, StatusStore};
use conveyor_storage::{BlobStore, S3BlobStore};

use crate::config::ApiConfig;

/// Shared application state.
///
/// The collaborators are trait objects so tests can run the full router
/// against the in-memory backends.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub queue: Arc<dyn Queue>,
    pub status: Arc<dyn StatusStore>,
    pub blobs: Arc<dyn BlobStore>,
}

impl AppState {
    /// Create application state from explicit collaborators.
    pub fn new(
        config: ApiConfig,
        queue: Arc<dyn Queue>,
        status: Arc<dyn StatusStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            config,
            queue,
            status,
            blobs,
        }
    }

    /// Create application state with the production backends.
    pub async fn from_env(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

        let queue = RedisQueue::connect(&redis_url, QueueConfig::from_env()).await?;
        let status = RedisStatusStore::connect(&redis_url)?;
        let blobs = S3BlobStore::from_env()?;

        Ok(Self {
            config,
            queue: Arc::new(queue),
            status: Arc::new(status),
            blobs: Arc::new(blobs),
        })
    }
}
