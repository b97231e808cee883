use image_ingest::{
    app_state::AppState,
    config::AppConfig,
    db::{self, PgImageRepository},
    routes,
    services::{
        images::ImageService, queue::RedisJobQueue, staging::StagingStore,
        validation::ImageFileValidator,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
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

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing image-ingest server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Connecting to Redis job queue");
    let queue = Arc::new(
        RedisJobQueue::new(&config.redis_url).expect("Failed to initialize job queue"),
    );

    tracing::info!(dir = %config.staging_dir.display(), "Preparing staging directory");
    let staging = StagingStore::new(&config.staging_dir);
    staging
        .ensure_dir()
        .await
        .expect("Failed to create staging directory");

    let images = ImageService::new(
        Arc::new(PgImageRepository::new(db_pool.clone())),
        staging,
        queue.clone(),
        ImageFileValidator::new(config.validation_config()),
        config.enqueue_options(),
    );

    let state = AppState::new(db_pool, images, queue);
    let app = routes::router(state, prometheus_handle, config.max_request_bytes());

    tracing::info!("Starting image-ingest on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");
}
