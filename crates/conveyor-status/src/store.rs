//! The status store trait.

use async_trait::async_trait;

use conveyor_models::{JobId, JobRecord, JobStatus, RecordPatch};

use crate::error::StatusResult;

/// Durable mapping from job id to job record.
///
/// `compare_and_set` is the sole concurrency-control primitive: when two
/// workers race on the same job (overlapping leases), exactly one mutation
/// wins and the loser observes `false` and treats the job as already handled.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Fetch a record. `None` if the id is unknown.
    async fn get(&self, job_id: &JobId) -> StatusResult<Option<JobRecord>>;

    /// Initial create. Errors if the id already exists.
    async fn put(&self, record: &JobRecord) -> StatusResult<()>;

    /// Apply `patch` iff the current status is one of `expected`.
    ///
    /// Returns `false` when the precondition fails, the record is missing, or
    /// the record is already terminal (terminal records never change).
    async fn compare_and_set(
        &self,
        job_id: &JobId,
        expected: &[JobStatus],
        patch: &RecordPatch,
    ) -> StatusResult<bool>;
}
