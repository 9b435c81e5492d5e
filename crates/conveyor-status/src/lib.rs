//! Job status store.
//!
//! This crate provides:
//! - The [`StatusStore`] trait: get, initial put, compare-and-set
//! - [`MemoryStatusStore`] for tests and single-process deployments
//! - [`RedisStatusStore`] keeping records as JSON values in Redis

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{StatusError, StatusResult};
pub use memory::MemoryStatusStore;
pub use redis_store::RedisStatusStore;
pub use store::StatusStore;
