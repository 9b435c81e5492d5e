//! In-memory blob store for tests and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{StorageError, StorageResult};
use crate::store::{BlobStore, StoredBlob};

/// In-memory blob store. The map is only updated with complete values, so
/// partial writes are never observable.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn write(&self, name: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        let blob = StoredBlob {
            data,
            content_type: content_type.to_string(),
        };
        let mut blobs = self.blobs.lock().await;
        blobs.insert(name.to_string(), blob);
        Ok(())
    }

    async fn read(&self, name: &str) -> StorageResult<StoredBlob> {
        let blobs = self.blobs.lock().await;
        blobs
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::not_found(name))
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        let mut blobs = self.blobs.lock().await;
        blobs.remove(name);
        Ok(())
    }
}
