//! At-least-once job queue.
//!
//! This crate provides:
//! - The [`Queue`] trait: enqueue, dequeue-with-lease, ack, poison
//! - [`MemoryQueue`] for tests and single-process deployments
//! - [`RedisQueue`] backed by Redis Streams with a consumer group

pub mod error;
pub mod memory;
pub mod message;
pub mod queue;
pub mod redis_queue;

pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use message::{Delivery, PoisonedMessage, QueueMessage};
pub use queue::{Queue, QueueConfig};
pub use redis_queue::RedisQueue;
