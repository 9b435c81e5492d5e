//! In-memory queue for tests and single-process deployments.
//!
//! Models the same lease discipline as the Redis backend: a dequeued message
//! is invisible until acked or until its visibility deadline passes, at which
//! point it becomes redeliverable with an incremented delivery count.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use conveyor_models::JobId;

use crate::error::QueueResult;
use crate::message::{Delivery, PoisonedMessage, QueueMessage};
use crate::queue::{Queue, QueueConfig};

#[derive(Debug)]
struct LeasedEntry {
    message: QueueMessage,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<QueueMessage>,
    leased: HashMap<String, LeasedEntry>,
    poisoned: Vec<PoisonedMessage>,
}

/// In-memory queue.
pub struct MemoryQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Move expired leases back to the ready queue.
    fn reclaim_expired(state: &mut QueueState, now: Instant) {
        let expired: Vec<String> = state
            .leased
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(lease, _)| lease.clone())
            .collect();
        for lease in expired {
            if let Some(entry) = state.leased.remove(&lease) {
                debug!(job_id = %entry.message.job_id, "lease expired, message redeliverable");
                state.ready.push_back(entry.message);
            }
        }
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn enqueue(&self, job_id: &JobId) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.ready.push_back(QueueMessage::new(job_id.clone()));
        Ok(())
    }

    async fn dequeue(&self) -> QueueResult<Option<Delivery>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        Self::reclaim_expired(&mut state, now);

        let Some(mut message) = state.ready.pop_front() else {
            return Ok(None);
        };
        message.delivery_count += 1;

        let lease = Uuid::new_v4().to_string();
        state.leased.insert(
            lease.clone(),
            LeasedEntry {
                message: message.clone(),
                deadline: now + self.config.visibility_timeout,
            },
        );

        Ok(Some(Delivery { message, lease }))
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        // A late ack after lease expiry is a no-op; the message has already
        // gone back to the ready queue and will be redelivered.
        if state.leased.remove(&delivery.lease).is_none() {
            debug!(job_id = %delivery.message.job_id, "ack for expired lease ignored");
        }
        Ok(())
    }

    async fn poison(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.leased.remove(&delivery.lease);
        state.poisoned.push(PoisonedMessage {
            message: delivery.message.clone(),
            error: error.to_string(),
            poisoned_at: Utc::now(),
        });
        Ok(())
    }

    async fn len(&self) -> QueueResult<u64> {
        let state = self.state.lock().await;
        Ok((state.ready.len() + state.leased.len()) as u64)
    }

    async fn poison_len(&self) -> QueueResult<u64> {
        let state = self.state.lock().await;
        Ok(state.poisoned.len() as u64)
    }

    async fn poisoned(&self) -> QueueResult<Vec<PoisonedMessage>> {
        let state = self.state.lock().await;
        Ok(state.poisoned.clone())
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    fn visibility_timeout(&self) -> Duration {
        self.config.visibility_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with_visibility(ms: u64) -> MemoryQueue {
        MemoryQueue::new(QueueConfig {
            visibility_timeout: Duration::from_millis(ms),
            ..QueueConfig::default()
        })
    }

    #[tokio::test]
    async fn leased_message_is_invisible() {
        let queue = queue_with_visibility(10_000);
        let job_id = JobId::new();
        queue.enqueue(&job_id).await.unwrap();

        let delivery = queue.dequeue().await.unwrap().expect("first delivery");
        assert_eq!(delivery.message.job_id, job_id);
        assert_eq!(delivery.message.delivery_count, 1);

        // Still leased: nothing visible to a second consumer.
        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ack_removes_message() {
        let queue = queue_with_visibility(10_000);
        queue.enqueue(&JobId::new()).await.unwrap();

        let delivery = queue.dequeue().await.unwrap().unwrap();
        queue.ack(&delivery).await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 0);
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_lease_redelivers_with_bumped_count() {
        let queue = queue_with_visibility(20);
        let job_id = JobId::new();
        queue.enqueue(&job_id).await.unwrap();

        let first = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(first.message.delivery_count, 1);

        tokio::time::sleep(Duration::from_millis(40)).await;

        let second = queue.dequeue().await.unwrap().expect("redelivery");
        assert_eq!(second.message.job_id, job_id);
        assert_eq!(second.message.delivery_count, 2);

        // Late ack of the first lease must not remove the redelivered message.
        queue.ack(&first).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn poison_moves_message_off_the_primary_queue() {
        let queue = queue_with_visibility(10_000);
        let job_id = JobId::new();
        queue.enqueue(&job_id).await.unwrap();

        let delivery = queue.dequeue().await.unwrap().unwrap();
        queue.poison(&delivery, "handler kept failing").await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 0);
        assert_eq!(queue.poison_len().await.unwrap(), 1);

        let parked = queue.poisoned().await.unwrap();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].message.job_id, job_id);
        assert_eq!(parked[0].error, "handler kept failing");
    }

    #[tokio::test]
    async fn fifo_order_for_ready_messages() {
        let queue = queue_with_visibility(10_000);
        let a = JobId::new();
        let b = JobId::new();
        queue.enqueue(&a).await.unwrap();
        queue.enqueue(&b).await.unwrap();

        let first = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(first.message.job_id, a);
        let second = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(second.message.job_id, b);
    }
}
