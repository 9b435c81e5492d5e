//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "conveyor_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "conveyor_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "conveyor_http_requests_in_flight";

    // Queue metrics
    pub const QUEUE_LENGTH: &str = "conveyor_queue_length";
    pub const QUEUE_POISON_LENGTH: &str = "conveyor_queue_poison_length";
    pub const JOBS_SUBMITTED_TOTAL: &str = "conveyor_jobs_submitted_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a job submission.
pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

/// Update queue length gauge.
pub fn set_queue_length(length: u64) {
    gauge!(names::QUEUE_LENGTH).set(length as f64);
}

/// Update poison queue length gauge.
pub fn set_poison_length(length: u64) {
    gauge!(names::QUEUE_POISON_LENGTH).set(length as f64);
}

/// Collapse job ids so each route stays a single metrics label.
fn sanitize_path(path: &str) -> String {
    let mut out = Vec::new();
    let mut segments = path.split('/');
    while let Some(segment) = segments.next() {
        out.push(segment.to_string());
        if segment == "jobs" {
            if let Some(id) = segments.next() {
                if !id.is_empty() {
                    out.push(":job_id".to_string());
                }
            }
        }
    }
    out.join("/")
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}
