//! In-memory collaborators and HTTP helpers for tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::multipart;
use serde::Deserialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

use image_ingest::db::{ImageRepository, RepositoryError};
use image_ingest::models::image::{ImageFilter, ImageRecord, ImageStatus, ImageUpdate, NewImage};
use image_ingest::models::job::{
    EnqueueOptions, FailureOutcome, ProcessingJob, QueueStats, QueuedJob,
};
use image_ingest::models::upload::UploadedFile;
use image_ingest::services::images::ImageService;
use image_ingest::services::processor::ImageProcessor;
use image_ingest::services::queue::{JobQueue, QueueError, DEFAULT_LEASE, STALLED_REASON};
use image_ingest::services::staging::StagingStore;
use image_ingest::services::storage::{ObjectStorage, StorageError, StoredObject};
use image_ingest::services::validation::{ImageFileValidator, ValidationConfig};

fn db_unavailable() -> RepositoryError {
    RepositoryError::Database(sqlx::Error::PoolTimedOut)
}

/// Repository backed by a map, with switchable failures
#[derive(Default)]
pub struct MemoryRepository {
    records: Mutex<HashMap<Uuid, ImageRecord>>,
    created: AtomicU64,
    pub fail_create: AtomicBool,
    /// Fail every update
    pub fail_updates: AtomicBool,
    /// Fail only updates that set COMPLETED
    pub fail_completion: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, id: Uuid) -> Option<ImageRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<ImageRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    pub fn insert(&self, record: ImageRecord) {
        self.records.lock().unwrap().insert(record.id, record);
    }
}

#[async_trait]
impl ImageRepository for MemoryRepository {
    async fn create(&self, data: NewImage) -> Result<ImageRecord, RepositoryError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(db_unavailable());
        }
        // Strictly increasing timestamps keep newest-first ordering stable
        let n = self.created.fetch_add(1, Ordering::SeqCst) as i64;
        let record = ImageRecord {
            id: Uuid::new_v4(),
            url: data.url,
            title: data.title,
            width: data.width,
            height: data.height,
            status: data.status,
            created_at: Utc::now() + ChronoDuration::milliseconds(n),
            deleted_at: None,
        };
        self.insert(record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ImageRecord>, RepositoryError> {
        Ok(self.get(id))
    }

    async fn update(&self, id: Uuid, update: ImageUpdate) -> Result<ImageRecord, RepositoryError> {
        if self.fail_updates.load(Ordering::SeqCst)
            || (self.fail_completion.load(Ordering::SeqCst)
                && update.status == Some(ImageStatus::Completed))
        {
            return Err(db_unavailable());
        }
        let mut records = self.records.lock().unwrap();
        let current = records.get(&id).cloned().ok_or(RepositoryError::NotFound(id))?;
        let next = current.apply(&update)?;
        records.insert(id, next.clone());
        Ok(next)
    }

    async fn soft_delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        let mut records = self.records.lock().unwrap();
        let current = records.get(&id).cloned().ok_or(RepositoryError::NotFound(id))?;
        records.insert(id, current.soft_delete(Utc::now()));
        Ok(())
    }

    async fn find_many_with_count(
        &self,
        filter: &ImageFilter,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<ImageRecord>, i64), RepositoryError> {
        let needle = filter.title.as_deref().map(str::to_lowercase);
        let mut matching: Vec<ImageRecord> = self
            .all()
            .into_iter()
            .filter(|r| !r.is_deleted())
            .filter(|r| match (&needle, &r.title) {
                (None, _) => true,
                (Some(n), Some(t)) => t.to_lowercase().contains(n.as_str()),
                (Some(_), None) => false,
            })
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let skip = (page.saturating_sub(1) * limit) as usize;
        let records = matching.into_iter().skip(skip).take(limit as usize).collect();
        Ok((records, total))
    }
}

/// Object storage kept in memory
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    pub fail_upload: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn object(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(
        &self,
        data: &[u8],
        key: &str,
        content_type: &str,
    ) -> Result<StoredObject, StorageError> {
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(StorageError::UnexpectedStatus {
                key: key.to_string(),
                code: 503,
            });
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (data.to_vec(), content_type.to_string()));
        Ok(StoredObject {
            key: key.to_string(),
            url: self.url(key).await?,
            bucket: "fm-bucket".to_string(),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn url(&self, key: &str) -> Result<String, StorageError> {
        Ok(format!("http://localhost:4566/fm-bucket/{}", key))
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.object(key)
            .map(|(bytes, _)| bytes)
            .ok_or_else(|| StorageError::UnexpectedStatus {
                key: key.to_string(),
                code: 404,
            })
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.object(key).is_some())
    }
}

#[derive(Default)]
struct QueueState {
    waiting: VecDeque<QueuedJob>,
    /// Active jobs with their lease deadline
    active: Vec<(Instant, QueuedJob)>,
    delayed: Vec<(Instant, QueuedJob)>,
    failed: HashMap<Uuid, QueuedJob>,
    live: HashSet<Uuid>,
    completed: u64,
}

impl QueueState {
    fn apply_failure(&mut self, job: &QueuedJob, reason: &str) -> FailureOutcome {
        let next = job.after_failure(reason);
        let outcome = job.options.on_failure(next.attempts_made);
        match &outcome {
            FailureOutcome::Retry { delay, .. } => {
                self.delayed.push((Instant::now() + *delay, next));
            }
            FailureOutcome::Exhausted { retained, .. } => {
                if *retained {
                    self.failed.insert(job.job.image_id, next);
                } else {
                    self.live.remove(&job.job.image_id);
                }
            }
        }
        outcome
    }
}

/// FIFO queue with the same dedup, lease and retry rules as the Redis queue
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    lease: Duration,
    pub fail_enqueue: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            lease: DEFAULT_LEASE,
            fail_enqueue: AtomicBool::new(false),
        })
    }

    pub fn waiting_jobs(&self) -> Vec<ProcessingJob> {
        self.state
            .lock()
            .unwrap()
            .waiting
            .iter()
            .map(|q| q.job.clone())
            .collect()
    }

    pub fn failed_job(&self, id: Uuid) -> Option<QueuedJob> {
        self.state.lock().unwrap().failed.get(&id).cloned()
    }

    /// Let every active lease run out, as if its worker died.
    pub fn expire_leases(&self) {
        let now = Instant::now();
        for (deadline, _) in self.state.lock().unwrap().active.iter_mut() {
            *deadline = now;
        }
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(
        &self,
        job: &ProcessingJob,
        options: &EnqueueOptions,
    ) -> Result<(), QueueError> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(QueueError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))));
        }
        let mut state = self.state.lock().unwrap();
        if !state.live.insert(job.image_id) {
            return Err(QueueError::DuplicateJob(job.image_id));
        }
        state
            .waiting
            .push_back(QueuedJob::new(job.clone(), options.clone()));
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.delayed)
            .into_iter()
            .partition(|(ready_at, _)| *ready_at <= now);
        state.delayed = pending;
        state.waiting.extend(due.into_iter().map(|(_, job)| job));

        let next = state.waiting.pop_front();
        if let Some(job) = &next {
            state.active.push((now + self.lease, job.clone()));
        }
        Ok(next)
    }

    async fn complete(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        state.active.retain(|(_, j)| j != job);
        state.completed += 1;
        if job.options.discard_on_success {
            state.live.remove(&job.job.image_id);
        }
        Ok(())
    }

    async fn fail(&self, job: &QueuedJob, reason: &str) -> Result<FailureOutcome, QueueError> {
        let mut state = self.state.lock().unwrap();
        state.active.retain(|(_, j)| j != job);
        Ok(state.apply_failure(job, reason))
    }

    async fn recover_stalled(&self) -> Result<Vec<(QueuedJob, FailureOutcome)>, QueueError> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let (expired, held): (Vec<_>, Vec<_>) = std::mem::take(&mut state.active)
            .into_iter()
            .partition(|(deadline, _)| *deadline <= now);
        state.active = held;

        Ok(expired
            .into_iter()
            .map(|(_, job)| {
                let outcome = state.apply_failure(&job, STALLED_REASON);
                (job, outcome)
            })
            .collect())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let state = self.state.lock().unwrap();
        Ok(QueueStats {
            waiting: state.waiting.len() as u64,
            delayed: state.delayed.len() as u64,
            active: state.active.len() as u64,
            completed: state.completed,
            failed: state.failed.len() as u64,
        })
    }
}

/// Service and worker wired to in-memory collaborators over a temp staging dir
pub struct TestPipeline {
    pub repository: Arc<MemoryRepository>,
    pub storage: Arc<MemoryStorage>,
    pub queue: Arc<MemoryQueue>,
    pub staging: StagingStore,
    pub service: ImageService,
    pub processor: ImageProcessor,
    _dir: tempfile::TempDir,
}

impl TestPipeline {
    pub fn new() -> Self {
        Self::with_options(EnqueueOptions {
            backoff_ms: 0,
            ..EnqueueOptions::default()
        })
    }

    pub fn with_options(options: EnqueueOptions) -> Self {
        Self::build(options, ValidationConfig::new(100, 10_000))
    }

    pub fn build(options: EnqueueOptions, validation: ValidationConfig) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let staging = StagingStore::new(dir.path());
        let repository = MemoryRepository::new();
        let storage = MemoryStorage::new();
        let queue = MemoryQueue::new();

        let service = ImageService::new(
            repository.clone(),
            staging.clone(),
            queue.clone(),
            ImageFileValidator::new(validation),
            options,
        );
        let processor =
            ImageProcessor::new(repository.clone(), storage.clone(), staging.clone());

        Self {
            repository,
            storage,
            queue,
            staging,
            service,
            processor,
            _dir: dir,
        }
    }

    pub fn staged_files(&self) -> usize {
        std::fs::read_dir(self.staging.dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

pub fn uploaded(bytes: Vec<u8>, name: &str, mime: &str) -> UploadedFile {
    UploadedFile::new(bytes, name, mime)
}

// HTTP helpers for tests against a running server

/// Image body returned by the API
#[derive(Debug, Deserialize)]
pub struct ImageBody {
    pub id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub width: i32,
    pub height: i32,
    pub status: String,
}

/// Error body returned by the API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    pub error: String,
    pub message: String,
}

pub fn base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

/// POST a file to /api/v1/images
pub async fn upload_file(
    client: &reqwest::Client,
    base_url: &str,
    bytes: Vec<u8>,
    filename: &str,
    mime: &str,
    fields: &[(&str, &str)],
) -> Result<reqwest::Response, Box<dyn std::error::Error>> {
    let mut form = multipart::Form::new().part(
        "file",
        multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime)?,
    );
    for (name, value) in fields {
        form = form.text(name.to_string(), value.to_string());
    }

    let response = client
        .post(format!("{}/api/v1/images", base_url))
        .multipart(form)
        .send()
        .await?;
    Ok(response)
}

/// Poll an image until it leaves PROCESSING
pub async fn wait_for_terminal(
    client: &reqwest::Client,
    base_url: &str,
    id: Uuid,
    timeout: Duration,
) -> Result<ImageBody, Box<dyn std::error::Error>> {
    let start = Instant::now();
    loop {
        let body: ImageBody = client
            .get(format!("{}/api/v1/images/{}", base_url, id))
            .send()
            .await?
            .json()
            .await?;
        if body.status != "PROCESSING" {
            return Ok(body);
        }
        if start.elapsed() > timeout {
            return Err(format!("image {} still processing after {:?}", id, timeout).into());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
