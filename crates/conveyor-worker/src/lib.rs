//! Job worker.
//!
//! This crate provides:
//! - The [`Handler`] contract and its error taxonomy
//! - [`JobExecutor`]: the poll/lease/retry loop driving jobs to a terminal state
//! - A built-in text-transform handler
//! - Graceful shutdown with in-flight drain

pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod text;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{JobExecutor, WorkerContext};
pub use handler::{Handler, HandlerError};
pub use text::TextHandler;
