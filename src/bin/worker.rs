use image_ingest::{
    config::AppConfig,
    db::{self, PgImageRepository},
    routes,
    services::{
        processor::ImageProcessor, queue::RedisJobQueue, staging::StagingStore,
        storage::S3Storage, worker_pool::WorkerPool,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting image processing worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    let metrics_addr: SocketAddr = config
        .metrics_addr
        .parse()
        .expect("METRICS_ADDR must be a socket address");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    routes::metrics::describe_metrics();
    tracing::info!(addr = %metrics_addr, "Serving worker metrics");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing S3 storage client");
    let storage = S3Storage::new(
        &config.s3_bucket,
        &config.s3_region,
        &config.s3_endpoint,
        &config.s3_access_key,
        &config.s3_secret_key,
        config.s3_public_endpoint.as_deref(),
    )
    .expect("Failed to initialize S3 client");

    let queue = RedisJobQueue::new(&config.redis_url)
        .expect("Failed to initialize job queue")
        .with_lease(config.job_lease());

    let processor = ImageProcessor::new(
        Arc::new(PgImageRepository::new(db_pool)),
        Arc::new(storage),
        StagingStore::new(&config.staging_dir),
    );

    let pool = WorkerPool::new(
        Arc::new(queue),
        Arc::new(processor),
        config.worker_concurrency,
        config.poll_interval(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, draining workers");
        }
        let _ = shutdown_tx.send(true);
    });

    tracing::info!("Worker ready, starting job processing loop");
    pool.run(shutdown_rx).await;
}
