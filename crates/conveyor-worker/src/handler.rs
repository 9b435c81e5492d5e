//! The handler contract.

use async_trait::async_trait;
use thiserror::Error;

use conveyor_models::Artifact;

/// How a handler invocation can fail.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload can never succeed; the job fails after this one attempt.
    #[error("Invalid payload: {0}")]
    Validation(String),

    /// A dependency or I/O failure; the job is retried up to the delivery
    /// budget, then poisoned.
    #[error("Transient failure: {0}")]
    Transient(String),
}

impl HandlerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }
}

/// A content generator: one job type's transformation from payload to artifact.
///
/// Handlers run under the worker's timeout and are abandoned, not
/// interrupted, when it elapses; the same logical job may therefore be
/// invoked more than once, so any external side effects must be idempotent
/// or self-cleaning.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn run(&self, payload: &serde_json::Value) -> Result<Artifact, HandlerError>;
}
