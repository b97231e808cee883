use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::job::EnqueueOptions;
use crate::services::validation::ValidationConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the job queue
    pub redis_url: String,

    #[serde(default = "default_s3_bucket")]
    pub s3_bucket: String,

    /// S3-compatible API endpoint (AWS, R2, LocalStack)
    pub s3_endpoint: String,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    #[serde(default = "default_s3_credential")]
    pub s3_access_key: String,

    #[serde(default = "default_s3_credential")]
    pub s3_secret_key: String,

    /// Base URL clients use to fetch stored images. Defaults to the API endpoint.
    #[serde(default)]
    pub s3_public_endpoint: Option<String>,

    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: usize,

    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,

    /// Local directory for uploads awaiting processing
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_job_attempts")]
    pub job_attempts: u32,

    #[serde(default = "default_job_backoff_ms")]
    pub job_backoff_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a worker may hold a job before it is treated as stalled
    #[serde(default = "default_job_lease_ms")]
    pub job_lease_ms: u64,

    /// Prometheus scrape listener for the worker. Unused by the API server.
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_s3_bucket() -> String {
    "fm-bucket".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_s3_credential() -> String {
    "test".to_string()
}

fn default_max_file_size_mb() -> usize {
    100
}

fn default_max_image_dimension() -> u32 {
    10_000
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("fm-uploads")
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_job_attempts() -> u32 {
    3
}

fn default_job_backoff_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_job_lease_ms() -> u64 {
    300_000
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9091".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn validation_config(&self) -> ValidationConfig {
        ValidationConfig::new(self.max_file_size_mb, self.max_image_dimension)
    }

    pub fn enqueue_options(&self) -> EnqueueOptions {
        EnqueueOptions {
            max_attempts: self.job_attempts.max(1),
            backoff_ms: self.job_backoff_ms,
            ..EnqueueOptions::default()
        }
    }

    /// Request body cap: the file limit plus room for the other form fields.
    pub fn max_request_bytes(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024 + 64 * 1024
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_lease(&self) -> Duration {
        Duration::from_millis(self.job_lease_ms)
    }
}
