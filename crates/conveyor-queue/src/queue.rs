//! The queue trait and its configuration.

use std::time::Duration;

use async_trait::async_trait;

use conveyor_models::JobId;

use crate::error::QueueResult;
use crate::message::{Delivery, PoisonedMessage};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Primary stream/queue name
    pub stream_name: String,
    /// Poison queue name for messages past the retry budget
    pub poison_stream_name: String,
    /// Consumer group name (Redis backend)
    pub consumer_group: String,
    /// Lease visibility timeout `V`
    pub visibility_timeout: Duration,
    /// Delivery budget before a message is poisoned
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stream_name: "conveyor:jobs".to_string(),
            poison_stream_name: "conveyor:poison".to_string(),
            consumer_group: "conveyor:workers".to_string(),
            visibility_timeout: Duration::from_secs(600),
            max_attempts: 5,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            poison_stream_name: std::env::var("QUEUE_POISON_STREAM")
                .unwrap_or(defaults.poison_stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            max_attempts: std::env::var("QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        }
    }
}

/// At-least-once delivery channel of job references.
///
/// Dequeue grants a lease until the visibility deadline; an unacked message
/// becomes redeliverable when the deadline passes, which is how crashed or
/// abandoned workers are recovered. Delivery counts increase on every
/// delivery; the worker moves over-budget messages to the poison queue.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Enqueue a reference to a job.
    async fn enqueue(&self, job_id: &JobId) -> QueueResult<()>;

    /// Dequeue the next visible message, if any, taking a lease on it.
    async fn dequeue(&self) -> QueueResult<Option<Delivery>>;

    /// Acknowledge a delivery, removing the message permanently.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Move a delivery to the poison queue. Implies ack on the primary queue.
    async fn poison(&self, delivery: &Delivery, error: &str) -> QueueResult<()>;

    /// Number of messages on the primary queue (visible or leased).
    async fn len(&self) -> QueueResult<u64>;

    /// Number of messages parked on the poison queue.
    async fn poison_len(&self) -> QueueResult<u64>;

    /// Snapshot of the poison queue for operator inspection.
    async fn poisoned(&self) -> QueueResult<Vec<PoisonedMessage>>;

    /// Delivery budget.
    fn max_attempts(&self) -> u32;

    /// Lease visibility timeout `V`.
    fn visibility_timeout(&self) -> Duration;
}
