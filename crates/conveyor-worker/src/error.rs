//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Executor stopped: {0}")]
    ExecutorStopped(String),

    #[error("Queue error: {0}")]
    Queue(#[from] conveyor_queue::QueueError),

    #[error("Status store error: {0}")]
    Status(#[from] conveyor_status::StatusError),

    #[error("Storage error: {0}")]
    Storage(#[from] conveyor_storage::StorageError),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn executor_stopped(msg: impl Into<String>) -> Self {
        Self::ExecutorStopped(msg.into())
    }
}
