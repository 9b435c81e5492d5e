//! End-to-end pipeline tests on the in-memory backends.
//!
//! Timings are deliberately small: visibility timeout 100ms, handler timeout
//! 40ms, so lease expiry and redelivery happen within a test run.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use conveyor_models::{Artifact, JobId, JobRecord, JobStatus};
use conveyor_queue::{MemoryQueue, Queue, QueueConfig};
use conveyor_status::{MemoryStatusStore, StatusStore};
use conveyor_storage::{BlobStore, MemoryBlobStore};
use conveyor_worker::{Handler, HandlerError, JobExecutor, TextHandler, WorkerConfig};

const VISIBILITY: Duration = Duration::from_millis(100);
const HANDLER_TIMEOUT: Duration = Duration::from_millis(40);
const WAIT_DEADLINE: Duration = Duration::from_secs(10);

struct Harness {
    queue: Arc<MemoryQueue>,
    status: Arc<MemoryStatusStore>,
    blobs: Arc<MemoryBlobStore>,
    executor: Arc<JobExecutor>,
    run_task: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn start(max_attempts: u32, handler: Arc<dyn Handler>) -> Self {
        let queue = Arc::new(MemoryQueue::new(QueueConfig {
            visibility_timeout: VISIBILITY,
            max_attempts,
            ..QueueConfig::default()
        }));
        let status = Arc::new(MemoryStatusStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());

        let config = WorkerConfig {
            max_concurrent_jobs: 2,
            poll_interval: Duration::from_millis(10),
            handler_timeout: HANDLER_TIMEOUT,
            record_lookup_retries: 3,
            record_lookup_backoff: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(1),
        };

        let executor = Arc::new(
            JobExecutor::new(
                config,
                queue.clone() as Arc<dyn Queue>,
                status.clone() as Arc<dyn StatusStore>,
                blobs.clone() as Arc<dyn BlobStore>,
                handler,
            )
            .unwrap(),
        );

        let run_executor = Arc::clone(&executor);
        let run_task = tokio::spawn(async move {
            run_executor.run().await.unwrap();
        });

        Self {
            queue,
            status,
            blobs,
            executor,
            run_task,
        }
    }

    /// What the API does on submission: record first, then the queue message.
    async fn submit(&self, payload: Value) -> JobId {
        let record = JobRecord::new(payload);
        let job_id = record.id.clone();
        self.status.put(&record).await.unwrap();
        self.queue.enqueue(&job_id).await.unwrap();
        job_id
    }

    async fn wait_for_terminal(&self, job_id: &JobId) -> JobRecord {
        let deadline = tokio::time::Instant::now() + WAIT_DEADLINE;
        loop {
            let record = self.status.get(job_id).await.unwrap().expect("record exists");
            if record.is_terminal() {
                return record;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {} never reached a terminal state (status {})",
                job_id,
                record.status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn stop(self) {
        self.executor.shutdown();
        let _ = self.run_task.await;
    }
}

/// Handler that plays back a scripted outcome per invocation and counts calls.
struct ScriptedHandler {
    outcomes: tokio::sync::Mutex<Vec<Outcome>>,
    calls: AtomicU32,
}

enum Outcome {
    Succeed,
    Transient,
    Validation,
    Hang,
}

impl ScriptedHandler {
    fn new(outcomes: Vec<Outcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: tokio::sync::Mutex::new(outcomes),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for ScriptedHandler {
    async fn run(&self, _payload: &Value) -> Result<Artifact, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut outcomes = self.outcomes.lock().await;
            if outcomes.is_empty() {
                Outcome::Succeed
            } else {
                outcomes.remove(0)
            }
        };
        match next {
            Outcome::Succeed => Ok(Artifact::new(
                b"done".to_vec(),
                "text/plain",
                "result.txt",
            )),
            Outcome::Transient => Err(HandlerError::transient("upstream unavailable")),
            Outcome::Validation => Err(HandlerError::validation("bad payload")),
            Outcome::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                unreachable!("handler should have been abandoned by the timeout")
            }
        }
    }
}

#[tokio::test]
async fn uppercase_job_runs_to_done_with_stored_artifact() {
    let harness = Harness::start(5, Arc::new(TextHandler));

    let job_id = harness
        .submit(json!({"text": "hi", "operation": "uppercase"}))
        .await;
    let record = harness.wait_for_terminal(&job_id).await;

    assert_eq!(record.status, JobStatus::Done);
    assert_eq!(record.attempts, 1);
    let blob_name = record.blob_name.as_deref().expect("blob name set");
    assert!(blob_name.starts_with(&format!("{}/", job_id)));
    assert!(blob_name.ends_with("/result.txt"));
    assert_eq!(record.filename(), Some("result.txt"));

    let blob = harness.blobs.read(blob_name).await.unwrap();
    assert_eq!(blob.data, b"HI");
    assert!(blob.content_type.starts_with("text/plain"));

    // Done job leaves nothing behind on either queue.
    assert_eq!(harness.queue.len().await.unwrap(), 0);
    assert_eq!(harness.queue.poison_len().await.unwrap(), 0);

    harness.stop().await;
}

#[tokio::test]
async fn validation_failure_fails_after_exactly_one_attempt() {
    let handler = ScriptedHandler::new(vec![Outcome::Validation]);
    let harness = Harness::start(5, handler.clone());

    let job_id = harness.submit(json!({"whatever": true})).await;
    let record = harness.wait_for_terminal(&job_id).await;

    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("bad payload"));
    assert_eq!(record.attempts, 1);
    assert_eq!(handler.calls(), 1);
    assert!(record.blob_name.is_none());

    // Failed immediately: no redelivery, no poison.
    assert_eq!(harness.queue.len().await.unwrap(), 0);
    assert_eq!(harness.queue.poison_len().await.unwrap(), 0);

    harness.stop().await;
}

#[tokio::test]
async fn transient_failure_retries_then_succeeds() {
    let handler = ScriptedHandler::new(vec![Outcome::Transient, Outcome::Succeed]);
    let harness = Harness::start(5, handler.clone());

    let job_id = harness.submit(json!({"n": 1})).await;
    let record = harness.wait_for_terminal(&job_id).await;

    assert_eq!(record.status, JobStatus::Done);
    assert_eq!(record.attempts, 2);
    assert_eq!(handler.calls(), 2);
    assert_eq!(harness.queue.poison_len().await.unwrap(), 0);

    harness.stop().await;
}

#[tokio::test]
async fn persistent_transient_failure_poisons_after_budget() {
    let max_attempts = 3;
    let handler = ScriptedHandler::new(vec![
        Outcome::Transient,
        Outcome::Transient,
        Outcome::Transient,
        Outcome::Transient,
    ]);
    let harness = Harness::start(max_attempts, handler.clone());

    let job_id = harness.submit(json!({"n": 1})).await;
    let record = harness.wait_for_terminal(&job_id).await;

    assert_eq!(record.status, JobStatus::Poisoned);
    assert_eq!(handler.calls(), max_attempts);
    assert_eq!(record.attempts, max_attempts);

    let parked = harness.queue.poisoned().await.unwrap();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].message.job_id, job_id);
    assert!(parked[0].error.contains("upstream unavailable"));
    assert_eq!(harness.queue.len().await.unwrap(), 0);

    harness.stop().await;
}

#[tokio::test]
async fn hung_handler_is_abandoned_and_job_retried() {
    let handler = ScriptedHandler::new(vec![Outcome::Hang, Outcome::Succeed]);
    let harness = Harness::start(5, handler.clone());

    let job_id = harness.submit(json!({"n": 1})).await;
    let record = harness.wait_for_terminal(&job_id).await;

    assert_eq!(record.status, JobStatus::Done);
    assert_eq!(record.attempts, 2);
    assert_eq!(handler.calls(), 2);
    let error = record.error.as_deref().expect("timeout recorded");
    assert!(error.contains("timed out"));

    harness.stop().await;
}

#[tokio::test]
async fn timeouts_on_early_attempts_still_reach_done() {
    let handler = ScriptedHandler::new(vec![Outcome::Hang, Outcome::Hang, Outcome::Succeed]);
    let harness = Harness::start(5, handler.clone());

    let job_id = harness.submit(json!({"n": 1})).await;
    let record = harness.wait_for_terminal(&job_id).await;

    assert_eq!(record.status, JobStatus::Done);
    assert_eq!(record.attempts, 3);
    assert_eq!(handler.calls(), 3);

    // Only the successful attempt's output is visible.
    let blob = harness
        .blobs
        .read(record.blob_name.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(blob.data, b"done");

    harness.stop().await;
}

#[tokio::test]
async fn hung_handler_every_time_poisons() {
    let handler = ScriptedHandler::new(vec![Outcome::Hang, Outcome::Hang]);
    let harness = Harness::start(2, handler.clone());

    let job_id = harness.submit(json!({"n": 1})).await;
    let record = harness.wait_for_terminal(&job_id).await;

    assert_eq!(record.status, JobStatus::Poisoned);
    assert_eq!(handler.calls(), 2);
    assert!(record.error.as_deref().unwrap_or("").contains("timed out"));
    assert_eq!(harness.queue.poison_len().await.unwrap(), 1);

    harness.stop().await;
}

#[tokio::test]
async fn duplicate_delivery_of_finished_job_is_acked_without_rerun() {
    let handler = ScriptedHandler::new(vec![Outcome::Succeed]);
    let harness = Harness::start(5, handler.clone());

    let job_id = harness.submit(json!({"n": 1})).await;
    let record = harness.wait_for_terminal(&job_id).await;
    assert_eq!(record.status, JobStatus::Done);

    // At-least-once delivery can hand the same job out again.
    harness.queue.enqueue(&job_id).await.unwrap();

    let deadline = tokio::time::Instant::now() + WAIT_DEADLINE;
    while harness.queue.len().await.unwrap() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "duplicate never drained");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(handler.calls(), 1);
    let record = harness.status.get(&job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Done);
    assert_eq!(record.attempts, 1);

    harness.stop().await;
}

#[tokio::test]
async fn message_without_record_is_poisoned() {
    let handler = ScriptedHandler::new(vec![]);
    let harness = Harness::start(5, handler.clone());

    // Queue message with no corresponding record (submission bug or a
    // record expired out from under the queue).
    let orphan = JobId::new();
    harness.queue.enqueue(&orphan).await.unwrap();

    let deadline = tokio::time::Instant::now() + WAIT_DEADLINE;
    while harness.queue.poison_len().await.unwrap() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "orphan never poisoned");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(handler.calls(), 0);
    assert_eq!(harness.queue.len().await.unwrap(), 0);

    harness.stop().await;
}

#[tokio::test]
async fn concurrent_jobs_all_reach_done() {
    let harness = Harness::start(5, Arc::new(TextHandler));

    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(
            harness
                .submit(json!({"text": format!("job {}", i), "operation": "uppercase"}))
                .await,
        );
    }

    for (i, job_id) in ids.iter().enumerate() {
        let record = harness.wait_for_terminal(job_id).await;
        assert_eq!(record.status, JobStatus::Done);
        let blob = harness
            .blobs
            .read(record.blob_name.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(blob.data, format!("JOB {}", i).into_bytes());
    }

    harness.stop().await;
}
