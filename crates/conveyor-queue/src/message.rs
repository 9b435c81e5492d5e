//! Queue message and delivery types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use conveyor_models::JobId;

/// A reference to a job travelling through the queue.
///
/// The payload itself lives in the job record; the queue only moves ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Job this message refers to
    pub job_id: JobId,
    /// When the message was first enqueued
    pub enqueued_at: DateTime<Utc>,
    /// How many times the message has been delivered (1-indexed on first delivery)
    pub delivery_count: u32,
}

impl QueueMessage {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            enqueued_at: Utc::now(),
            delivery_count: 0,
        }
    }
}

/// A dequeued message together with its lease token.
///
/// The lease is valid until the queue's visibility deadline; an unacked
/// delivery becomes redeliverable once the deadline passes.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: QueueMessage,
    /// Opaque lease token; passed back on ack/poison
    pub lease: String,
}

/// A message parked on the poison queue after exhausting its retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoisonedMessage {
    pub message: QueueMessage,
    /// Why the message was poisoned
    pub error: String,
    pub poisoned_at: DateTime<Utc>,
}
