//! Shared data models for the Conveyor job pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Job identifiers, records and the status state machine
//! - Compare-and-set record patches
//! - Handler output artifacts and content-type hinting

pub mod artifact;
pub mod job;

pub use artifact::{extension_hint, Artifact};
pub use job::{JobId, JobRecord, JobStatus, RecordPatch};
