//! Status store error types.

use thiserror::Error;

pub type StatusResult<T> = Result<T, StatusError>;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StatusError {
    pub fn already_exists(job_id: impl Into<String>) -> Self {
        Self::AlreadyExists(job_id.into())
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }
}
