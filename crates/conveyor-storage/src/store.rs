//! The blob store trait.

use async_trait::async_trait;

use crate::error::StorageResult;

/// A stored blob: the bytes and the content type declared at write time.
///
/// The content type is carried end-to-end from the handler that produced the
/// artifact; it is never inferred from the bytes.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// Durable object storage keyed by name.
///
/// Writes are all-or-nothing: a partial write never becomes visible to
/// readers. Blobs are immutable once written by convention; the pipeline
/// derives names from job ids so distinct jobs never collide.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `name` with the declared content type.
    async fn write(&self, name: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Fetch a blob. Errors with `NotFound` if the name is unknown.
    async fn read(&self, name: &str) -> StorageResult<StoredBlob>;

    /// Delete a blob. Deleting an unknown name is a no-op.
    async fn delete(&self, name: &str) -> StorageResult<()>;
}
