//! Job worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use conveyor_queue::{QueueConfig, RedisQueue};
use conveyor_status::RedisStatusStore;
use conveyor_storage::S3BlobStore;
use conveyor_worker::{JobExecutor, TextHandler, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("conveyor=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting conveyor-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

    let queue_config = QueueConfig::from_env();
    let queue = match RedisQueue::connect(&redis_url, queue_config).await {
        Ok(q) => Arc::new(q),
        Err(e) => {
            error!("Failed to connect to job queue: {}", e);
            std::process::exit(1);
        }
    };

    let status = match RedisStatusStore::connect(&redis_url) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to connect to status store: {}", e);
            std::process::exit(1);
        }
    };

    let blobs = match S3BlobStore::from_env() {
        Ok(b) => Arc::new(b),
        Err(e) => {
            error!("Failed to create blob store: {}", e);
            std::process::exit(1);
        }
    };

    let executor = match JobExecutor::new(config, queue, status, blobs, Arc::new(TextHandler)) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            error!("Failed to create job executor: {}", e);
            std::process::exit(1);
        }
    };

    // ctrl-c triggers a graceful drain
    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
