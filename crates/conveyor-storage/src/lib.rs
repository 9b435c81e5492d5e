//! Artifact blob storage.
//!
//! This crate provides:
//! - The [`BlobStore`] trait: all-or-nothing writes, reads returning the
//!   stored content type, deletes
//! - [`MemoryBlobStore`] for tests and single-process deployments
//! - [`S3BlobStore`] for S3-compatible object storage (S3, R2, MinIO)

pub mod error;
pub mod memory;
pub mod s3;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryBlobStore;
pub use s3::{S3BlobStore, S3Config};
pub use store::{BlobStore, StoredBlob};
