//! HTTP API tests against the in-memory backends.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use conveyor_api::{create_router, ApiConfig, AppState};
use conveyor_models::{JobRecord, RecordPatch};
use conveyor_queue::{MemoryQueue, Queue, QueueConfig};
use conveyor_status::{MemoryStatusStore, StatusStore};
use conveyor_storage::{BlobStore, MemoryBlobStore};
use conveyor_worker::{JobExecutor, TextHandler, WorkerConfig};

struct TestApp {
    router: Router,
    queue: Arc<MemoryQueue>,
    status: Arc<MemoryStatusStore>,
    blobs: Arc<MemoryBlobStore>,
}

fn test_app() -> TestApp {
    let queue = Arc::new(MemoryQueue::new(QueueConfig {
        visibility_timeout: Duration::from_millis(200),
        ..QueueConfig::default()
    }));
    let status = Arc::new(MemoryStatusStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());

    let state = AppState::new(
        ApiConfig::default(),
        queue.clone() as Arc<dyn Queue>,
        status.clone() as Arc<dyn StatusStore>,
        blobs.clone() as Arc<dyn BlobStore>,
    );

    TestApp {
        router: create_router(state, None),
        queue,
        status,
        blobs,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn submit_accepts_job_and_enqueues_it() {
    let app = test_app();

    let (status, body) = send(
        &app.router,
        post_json("/jobs", &json!({"text": "hi", "operation": "uppercase"})),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");
    let job_id = body["job_id"].as_str().expect("job_id in response");

    assert_eq!(app.queue.len().await.unwrap(), 1);

    let (status, body) = send(&app.router, get(&format!("/jobs/{}/status", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["attempts"], 0);
}

#[tokio::test]
async fn empty_payloads_are_rejected() {
    let app = test_app();

    for payload in [json!({}), json!([]), json!(""), Value::Null] {
        let (status, body) = send(&app.router, post_json("/jobs", &payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "payload {:?}", payload);
        assert!(body["detail"].as_str().unwrap().contains("empty"));
    }

    assert_eq!(app.queue.len().await.unwrap(), 0);
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let app = test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("this is not json"))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn unknown_job_is_404() {
    let app = test_app();

    let (status, _) = send(&app.router, get("/jobs/no-such-job/status")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app.router, get("/jobs/no-such-job/content")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn content_of_unfinished_job_is_409() {
    let app = test_app();

    let (_, body) = send(&app.router, post_json("/jobs", &json!({"text": "hi"}))).await;
    let job_id = body["job_id"].as_str().unwrap();

    let (status, body) = send(&app.router, get(&format!("/jobs/{}/content", job_id))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["detail"].as_str().unwrap().contains("queued"));
}

#[tokio::test]
async fn content_of_done_job_is_served_with_headers() {
    let app = test_app();

    // Seed a finished job the way the worker leaves one behind.
    let mut record = JobRecord::new(json!({"text": "hi"}));
    record.apply(&RecordPatch::claim());
    let blob_name = format!("{}/result.txt", record.id);
    app.blobs
        .write(&blob_name, b"HI".to_vec(), "text/plain; charset=utf-8")
        .await
        .unwrap();
    record.apply(&RecordPatch::done(&blob_name, "text/plain; charset=utf-8"));
    app.status.put(&record).await.unwrap();

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/jobs/{}/content", record.id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"result.txt\""
    );

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"HI");
}

#[tokio::test]
async fn health_and_readiness() {
    let app = test_app();

    let (status, body) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app.router, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app.router, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["checks"]["queue"]["status"], "ok");
}

#[tokio::test]
async fn admin_queue_status_reports_depths() {
    let app = test_app();

    send(&app.router, post_json("/jobs", &json!({"text": "a"}))).await;
    send(&app.router, post_json("/jobs", &json!({"text": "b"}))).await;

    let (status, body) = send(&app.router, get("/admin/queue/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queue_length"], 2);
    assert_eq!(body["poison_length"], 0);

    let (status, body) = send(&app.router, get("/admin/queue/poisoned")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn submitted_job_reaches_done_and_content_downloads() {
    let app = test_app();

    // Run a worker against the same backends the router uses.
    let executor = Arc::new(
        JobExecutor::new(
            WorkerConfig {
                max_concurrent_jobs: 2,
                poll_interval: Duration::from_millis(10),
                handler_timeout: Duration::from_millis(100),
                record_lookup_retries: 3,
                record_lookup_backoff: Duration::from_millis(10),
                shutdown_timeout: Duration::from_secs(1),
            },
            app.queue.clone() as Arc<dyn Queue>,
            app.status.clone() as Arc<dyn StatusStore>,
            app.blobs.clone() as Arc<dyn BlobStore>,
            Arc::new(TextHandler),
        )
        .unwrap(),
    );
    let run_executor = Arc::clone(&executor);
    let run_task = tokio::spawn(async move { run_executor.run().await.unwrap() });

    let (status, body) = send(
        &app.router,
        post_json("/jobs", &json!({"text": "hi", "operation": "uppercase"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let (_, body) = send(&app.router, get(&format!("/jobs/{}/status", job_id))).await;
        if body["status"] == "done" {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job never finished, last status {}",
            body["status"]
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Repeated reads serve identical bytes.
    for _ in 0..2 {
        let response = app
            .router
            .clone()
            .oneshot(get(&format!("/jobs/{}/content", job_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"HI");
    }

    executor.shutdown();
    let _ = run_task.await;
}
