//! In-memory status store for tests and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use conveyor_models::{JobId, JobRecord, JobStatus, RecordPatch};

use crate::error::{StatusError, StatusResult};
use crate::store::StatusStore;

/// In-memory status store.
#[derive(Default)]
pub struct MemoryStatusStore {
    records: Mutex<HashMap<String, JobRecord>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn get(&self, job_id: &JobId) -> StatusResult<Option<JobRecord>> {
        let records = self.records.lock().await;
        Ok(records.get(job_id.as_str()).cloned())
    }

    async fn put(&self, record: &JobRecord) -> StatusResult<()> {
        let mut records = self.records.lock().await;
        if records.contains_key(record.id.as_str()) {
            return Err(StatusError::already_exists(record.id.as_str()));
        }
        records.insert(record.id.as_str().to_string(), record.clone());
        Ok(())
    }

    async fn compare_and_set(
        &self,
        job_id: &JobId,
        expected: &[JobStatus],
        patch: &RecordPatch,
    ) -> StatusResult<bool> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(job_id.as_str()) else {
            return Ok(false);
        };
        if record.is_terminal() || !expected.contains(&record.status) {
            return Ok(false);
        }
        record.apply(patch);
        Ok(true)
    }
}
