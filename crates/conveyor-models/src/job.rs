//! Job records and the status state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting in the queue
    #[default]
    Queued,
    /// A worker holds the lease and is running the handler
    Processing,
    /// Job completed; artifact stored
    Done,
    /// Job can never succeed (validation failure)
    Failed,
    /// Job exhausted its retry budget and was moved to the poison queue
    Poisoned,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Poisoned => "poisoned",
        }
    }

    /// Check if this is a terminal state (no more transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Poisoned)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable record of a single job.
///
/// Invariants maintained by the status store:
/// - `blob_name` and `content_type` are set iff `status == Done`
/// - a terminal record never changes again
/// - `attempts` only increases
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    /// Unique job ID, assigned at submission
    pub id: JobId,

    /// Current status
    pub status: JobStatus,

    /// Opaque job payload; structure belongs to the handler
    pub payload: serde_json::Value,

    /// Name of the stored artifact (set when Done)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_name: Option<String>,

    /// Content type declared by the handler (set when Done)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Last error observed for this job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Number of times a worker claimed this job
    pub attempts: u32,

    /// When the job was submitted
    pub created_at: DateTime<Utc>,

    /// When the record was last updated
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a freshly submitted record.
    pub fn new(payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Queued,
            payload,
            blob_name: None,
            content_type: None,
            error: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the record is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Display filename for the stored artifact, derived from the blob name.
    pub fn filename(&self) -> Option<&str> {
        self.blob_name
            .as_deref()
            .map(|name| name.rsplit('/').next().unwrap_or(name))
    }

    /// Apply a patch to this record, bumping `updated_at`.
    pub fn apply(&mut self, patch: &RecordPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(blob_name) = &patch.blob_name {
            self.blob_name = Some(blob_name.clone());
        }
        if let Some(content_type) = &patch.content_type {
            self.content_type = Some(content_type.clone());
        }
        if let Some(error) = &patch.error {
            self.error = Some(error.clone());
        }
        if patch.bump_attempts {
            self.attempts += 1;
        }
        self.updated_at = Utc::now();
    }
}

/// Mutation applied through the status store's compare-and-set.
///
/// Only the populated fields change; `updated_at` is always bumped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordPatch {
    pub status: Option<JobStatus>,
    pub blob_name: Option<String>,
    pub content_type: Option<String>,
    pub error: Option<String>,
    pub bump_attempts: bool,
}

impl RecordPatch {
    /// Worker claims the job: status -> Processing, attempts += 1.
    pub fn claim() -> Self {
        Self {
            status: Some(JobStatus::Processing),
            bump_attempts: true,
            ..Self::default()
        }
    }

    /// Successful completion with a stored artifact.
    pub fn done(blob_name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Done),
            blob_name: Some(blob_name.into()),
            content_type: Some(content_type.into()),
            ..Self::default()
        }
    }

    /// Permanent failure: the input can never succeed.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Retry budget exhausted; message moved to the poison queue.
    pub fn poisoned(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Poisoned),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Record a retriable error without leaving Processing, so the job
    /// stays claimable when the lease expires and the message redelivers.
    pub fn retry_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}
