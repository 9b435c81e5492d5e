//! Operator endpoints.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use conveyor_models::JobId;

use crate::error::ApiResult;
use crate::metrics;
use crate::state::AppState;

/// Queue status response.
#[derive(Serialize)]
pub struct QueueStatusResponse {
    pub queue_length: u64,
    pub poison_length: u64,
}

/// Get queue depths.
pub async fn get_queue_status(
    State(state): State<AppState>,
) -> ApiResult<Json<QueueStatusResponse>> {
    let queue_length = state.queue.len().await?;
    let poison_length = state.queue.poison_len().await?;

    metrics::set_queue_length(queue_length);
    metrics::set_poison_length(poison_length);

    Ok(Json(QueueStatusResponse {
        queue_length,
        poison_length,
    }))
}

/// One parked poison-queue message.
#[derive(Serialize)]
pub struct PoisonedEntry {
    pub job_id: JobId,
    pub delivery_count: u32,
    pub error: String,
    pub enqueued_at: DateTime<Utc>,
    pub poisoned_at: DateTime<Utc>,
}

/// List messages parked on the poison queue.
pub async fn list_poisoned(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<PoisonedEntry>>> {
    let parked = state.queue.poisoned().await?;

    Ok(Json(
        parked
            .into_iter()
            .map(|p| PoisonedEntry {
                job_id: p.message.job_id,
                delivery_count: p.message.delivery_count,
                error: p.error,
                enqueued_at: p.message.enqueued_at,
                poisoned_at: p.poisoned_at,
            })
            .collect(),
    ))
}
