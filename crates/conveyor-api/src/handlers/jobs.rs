//! Job submission and retrieval handlers.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use conveyor_models::{JobId, JobRecord, JobStatus};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Response to a job submission.
#[derive(Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// Job status response.
#[derive(Serialize)]
pub struct StatusResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<JobRecord> for StatusResponse {
    fn from(record: JobRecord) -> Self {
        Self {
            job_id: record.id,
            status: record.status,
            error: record.error,
            attempts: record.attempts,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Submit a job.
///
/// The record is written before the queue message, so a worker that
/// dequeues the message always finds (possibly after a short grace) the
/// payload to run. Returns 202: the work happens later.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    validate_payload(&payload)?;

    let record = JobRecord::new(payload);
    let job_id = record.id.clone();

    state.status.put(&record).await?;
    state.queue.enqueue(&job_id).await?;

    metrics::record_job_submitted();
    info!(%job_id, "Job submitted");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            status: JobStatus::Queued,
        }),
    ))
}

/// Empty payloads carry nothing for a handler to act on.
fn validate_payload(payload: &Value) -> ApiResult<()> {
    let empty = match payload {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    };
    if empty {
        return Err(ApiError::bad_request("payload must not be empty"));
    }
    Ok(())
}

/// Get the status of a job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let job_id = JobId::from_string(job_id);
    let record = state
        .status
        .get(&job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;

    Ok(Json(record.into()))
}

/// Download the artifact of a finished job.
///
/// 404 for an unknown job, 409 while it has not finished, 500 if the record
/// says done but the blob cannot be served.
pub async fn get_job_content(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let job_id = JobId::from_string(job_id);
    let record = state
        .status
        .get(&job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;

    if record.status != JobStatus::Done {
        return Err(ApiError::conflict(format!(
            "Job is not finished (status: {})",
            record.status
        )));
    }

    // Done implies both fields are set; a record violating that is corrupt.
    let blob_name = record
        .blob_name
        .as_deref()
        .ok_or_else(|| ApiError::internal("Done record has no artifact"))?;
    let filename = record.filename().unwrap_or("result");

    let blob = state.blobs.read(blob_name).await.map_err(|e| match e {
        conveyor_storage::StorageError::NotFound(_) => {
            ApiError::internal("Artifact missing from blob storage")
        }
        other => ApiError::from(other),
    })?;

    let content_type = record
        .content_type
        .clone()
        .unwrap_or(blob.content_type);

    let disposition = format!("attachment; filename=\"{}\"", sanitize_filename(filename));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        blob.data,
    )
        .into_response())
}

/// Keep the download filename header-safe.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
