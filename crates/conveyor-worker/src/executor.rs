//! Job executor: the poll/lease/retry loop.
//!
//! Correctness rests on two primitives only: the queue's
//! single-lease-per-message guarantee and the status store's
//! compare-and-set. There is no central lock and no cancellation; a timed-out
//! handler is abandoned and the job is redelivered after lease expiry.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use conveyor_models::{Artifact, JobId, JobRecord, JobStatus, RecordPatch};
use conveyor_queue::{Delivery, Queue};
use conveyor_status::StatusStore;
use conveyor_storage::BlobStore;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::handler::{Handler, HandlerError};

const JOBS_COMPLETED: &str = "conveyor_jobs_completed_total";
const JOBS_FAILED: &str = "conveyor_jobs_failed_total";
const JOBS_POISONED: &str = "conveyor_jobs_poisoned_total";
const JOBS_RETRIED: &str = "conveyor_jobs_retried_total";

/// Collaborators shared by every in-flight job.
pub struct WorkerContext {
    pub config: WorkerConfig,
    pub queue: Arc<dyn Queue>,
    pub status: Arc<dyn StatusStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub handler: Arc<dyn Handler>,
}

/// Job executor that processes deliveries from the queue.
pub struct JobExecutor {
    ctx: Arc<WorkerContext>,
    semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl JobExecutor {
    /// Create a new executor. Fails if the handler timeout is not strictly
    /// below the queue's visibility timeout.
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn Queue>,
        status: Arc<dyn StatusStore>,
        blobs: Arc<dyn BlobStore>,
        handler: Arc<dyn Handler>,
    ) -> WorkerResult<Self> {
        config.validate(queue.visibility_timeout())?;

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = tokio::sync::watch::channel(false);

        Ok(Self {
            ctx: Arc::new(WorkerContext {
                config,
                queue,
                status,
                blobs,
                handler,
            }),
            semaphore,
            shutdown,
        })
    }

    /// Run the poll loop until shutdown, then drain in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor with {} max concurrent jobs",
            self.ctx.config.max_concurrent_jobs
        );

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.poll_once() => {
                    if let Err(e) = result {
                        error!("Error polling queue: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        info!("Waiting for in-flight jobs to complete...");
        let _ = tokio::time::timeout(self.ctx.config.shutdown_timeout, self.wait_for_jobs()).await;

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Take one delivery from the queue, if any, and spawn its execution.
    async fn poll_once(&self) -> WorkerResult<()> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::executor_stopped("semaphore closed"))?;

        match self.ctx.queue.dequeue().await? {
            Some(delivery) => {
                let ctx = Arc::clone(&self.ctx);
                tokio::spawn(async move {
                    let _permit = permit;
                    Self::execute_job(ctx, delivery).await;
                });
            }
            None => {
                drop(permit);
                tokio::time::sleep(self.ctx.config.poll_interval).await;
            }
        }

        Ok(())
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            if self.semaphore.available_permits() == self.ctx.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Drive a single delivery to ack, redelivery eligibility, or poison.
    ///
    /// Every branch translates into a record transition; handler errors never
    /// escape as unhandled failures.
    async fn execute_job(ctx: Arc<WorkerContext>, delivery: Delivery) {
        let job_id = delivery.message.job_id.clone();
        let max_attempts = ctx.queue.max_attempts();

        let record = match Self::load_record(&ctx, &job_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                // The record should exist by the time a message is
                // processable; after the lookup grace this is unrecoverable.
                warn!(%job_id, "No record for queued message, poisoning");
                Self::poison_message(&ctx, &delivery, "job record not found").await;
                return;
            }
            Err(e) => {
                // Status store unavailable: leave the lease to expire.
                warn!(%job_id, "Record lookup failed, leaving for redelivery: {}", e);
                return;
            }
        };

        if record.is_terminal() {
            // At-least-once delivery: the job already finished elsewhere.
            debug!(%job_id, status = %record.status, "Duplicate delivery of finished job");
            Self::ack(&ctx, &delivery).await;
            return;
        }

        if delivery.message.delivery_count > max_attempts {
            // Redelivery already past the budget (repeatedly crashed workers).
            let error = format!(
                "delivery budget exhausted after {} deliveries",
                delivery.message.delivery_count
            );
            Self::poison_job(&ctx, &delivery, &job_id, &error).await;
            return;
        }

        // Claim: Queued on first delivery, Processing when redelivered after
        // an abandoned lease. A false return means another worker finished
        // the job between our get and the claim.
        let claimed = ctx
            .status
            .compare_and_set(
                &job_id,
                &[JobStatus::Queued, JobStatus::Processing],
                &RecordPatch::claim(),
            )
            .await;
        match claimed {
            Ok(true) => {}
            Ok(false) => {
                debug!(%job_id, "Job already handled, acking duplicate delivery");
                Self::ack(&ctx, &delivery).await;
                return;
            }
            Err(e) => {
                warn!(%job_id, "Claim failed, leaving for redelivery: {}", e);
                return;
            }
        }

        info!(%job_id, attempt = delivery.message.delivery_count, "Running handler");

        let outcome = tokio::time::timeout(
            ctx.config.handler_timeout,
            ctx.handler.run(&record.payload),
        )
        .await;

        match outcome {
            Ok(Ok(artifact)) => Self::complete(&ctx, &delivery, &job_id, artifact).await,
            Ok(Err(HandlerError::Validation(msg))) => {
                // The payload can never succeed; no redelivery wait.
                info!(%job_id, "Handler rejected payload: {}", msg);
                let failed = ctx
                    .status
                    .compare_and_set(&job_id, &[JobStatus::Processing], &RecordPatch::failed(&msg))
                    .await;
                if let Err(e) = failed {
                    warn!(%job_id, "Failed to record validation failure: {}", e);
                    return;
                }
                counter!(JOBS_FAILED).increment(1);
                Self::ack(&ctx, &delivery).await;
            }
            Ok(Err(HandlerError::Transient(msg))) => {
                Self::retry_or_poison(&ctx, &delivery, &job_id, &msg).await;
            }
            Err(_) => {
                let msg = format!(
                    "handler timed out after {:?}",
                    ctx.config.handler_timeout
                );
                Self::retry_or_poison(&ctx, &delivery, &job_id, &msg).await;
            }
        }
    }

    /// Store the artifact, publish DONE, ack.
    ///
    /// The blob write happens before the DONE transition so a job is never
    /// done without durably stored content.
    async fn complete(ctx: &WorkerContext, delivery: &Delivery, job_id: &JobId, artifact: Artifact) {
        if !artifact.hint_agrees() {
            warn!(
                %job_id,
                filename = %artifact.filename,
                content_type = %artifact.content_type,
                "Filename extension disagrees with declared content type"
            );
        }

        let blob_name = artifact_blob_name(job_id, &artifact.filename);
        let content_type = artifact.content_type.clone();

        if let Err(e) = ctx.blobs.write(&blob_name, artifact.data, &content_type).await {
            Self::retry_or_poison(ctx, delivery, job_id, &format!("artifact upload failed: {}", e))
                .await;
            return;
        }

        let done = ctx
            .status
            .compare_and_set(
                job_id,
                &[JobStatus::Processing],
                &RecordPatch::done(&blob_name, &content_type),
            )
            .await;
        match done {
            Ok(true) => {
                info!(%job_id, blob = %blob_name, "Job completed");
                counter!(JOBS_COMPLETED).increment(1);
            }
            Ok(false) => {
                // Overlapping-lease race: another worker's outcome won.
                warn!(%job_id, "Lost completion race, discarding this outcome");
            }
            Err(e) => {
                warn!(%job_id, "Failed to publish completion, leaving for redelivery: {}", e);
                return;
            }
        }

        Self::ack(ctx, delivery).await;
    }

    /// Retriable failure: poison once the budget is spent, otherwise record
    /// the error and let lease expiry trigger redelivery.
    async fn retry_or_poison(ctx: &WorkerContext, delivery: &Delivery, job_id: &JobId, msg: &str) {
        let count = delivery.message.delivery_count;
        let max_attempts = ctx.queue.max_attempts();

        if count >= max_attempts {
            let error = format!("{} (attempt {} of {})", msg, count, max_attempts);
            Self::poison_job(ctx, delivery, job_id, &error).await;
        } else {
            info!(%job_id, "Attempt {}/{} failed, will retry: {}", count, max_attempts, msg);
            let noted = ctx
                .status
                .compare_and_set(
                    job_id,
                    &[JobStatus::Processing],
                    &RecordPatch::retry_error(msg),
                )
                .await;
            if let Err(e) = noted {
                warn!(%job_id, "Failed to record retry error: {}", e);
            }
            counter!(JOBS_RETRIED).increment(1);
            // No ack: the message redelivers when the lease expires.
        }
    }

    /// Move the job to poisoned and its message to the poison queue.
    async fn poison_job(ctx: &WorkerContext, delivery: &Delivery, job_id: &JobId, error: &str) {
        warn!(%job_id, "Poisoning job: {}", error);
        let marked = ctx
            .status
            .compare_and_set(
                job_id,
                &[JobStatus::Queued, JobStatus::Processing],
                &RecordPatch::poisoned(error),
            )
            .await;
        if let Err(e) = marked {
            warn!(%job_id, "Failed to mark record poisoned: {}", e);
        }
        Self::poison_message(ctx, delivery, error).await;
        counter!(JOBS_POISONED).increment(1);
    }

    async fn poison_message(ctx: &WorkerContext, delivery: &Delivery, error: &str) {
        if let Err(e) = ctx.queue.poison(delivery, error).await {
            error!(job_id = %delivery.message.job_id, "Failed to poison message: {}", e);
        }
    }

    async fn ack(ctx: &WorkerContext, delivery: &Delivery) {
        if let Err(e) = ctx.queue.ack(delivery).await {
            error!(job_id = %delivery.message.job_id, "Failed to ack delivery: {}", e);
        }
    }

    /// Load the record, tolerating the brief window where the queue message
    /// outruns the record write.
    async fn load_record(ctx: &WorkerContext, job_id: &JobId) -> WorkerResult<Option<JobRecord>> {
        let mut lookups = 0;
        loop {
            if let Some(record) = ctx.status.get(job_id).await? {
                return Ok(Some(record));
            }
            lookups += 1;
            if lookups > ctx.config.record_lookup_retries {
                return Ok(None);
            }
            debug!(%job_id, "Record not visible yet, retrying lookup");
            tokio::time::sleep(ctx.config.record_lookup_backoff).await;
        }
    }
}

/// Blob key for one execution's artifact.
///
/// The key embeds a fresh uuid so overlapping leases on the same job can
/// never write to the same object; the winning DONE transition decides which
/// key the record points at.
fn artifact_blob_name(job_id: &JobId, filename: &str) -> String {
    format!("{}/{}/{}", job_id, Uuid::new_v4(), filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_names_are_unique_per_execution() {
        let job_id = JobId::new();

        let first = artifact_blob_name(&job_id, "result.txt");
        let second = artifact_blob_name(&job_id, "result.txt");

        assert_ne!(first, second);
        for name in [&first, &second] {
            assert!(name.starts_with(&format!("{}/", job_id)));
            assert!(name.ends_with("/result.txt"));
        }
    }
}
