use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use super::format::ImageFormat;

/// Work item handed to the processing worker. Immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingJob {
    /// Record id; also the queue dedup key.
    pub image_id: Uuid,
    pub local_file_path: PathBuf,
    pub original_width: u32,
    pub original_height: u32,
    pub target_width: Option<u32>,
    pub target_height: Option<u32>,
    pub format: ImageFormat,
    pub mimetype: String,
}

impl ProcessingJob {
    pub fn has_resize_target(&self) -> bool {
        self.target_width.is_some() || self.target_height.is_some()
    }
}

/// Redelivery policy attached to a job at enqueue time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnqueueOptions {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    /// Drop the job (and its dedup key) once it completes.
    pub discard_on_success: bool,
    /// Keep permanently failed jobs for inspection.
    pub retain_on_failure: bool,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 5000,
            discard_on_success: true,
            retain_on_failure: true,
        }
    }
}

/// What the queue does with a job after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    Retry { attempt: u32, delay: Duration },
    Exhausted { attempts: u32, retained: bool },
}

impl EnqueueOptions {
    /// Decide the next step after `attempts_made` attempts have failed.
    pub fn on_failure(&self, attempts_made: u32) -> FailureOutcome {
        if attempts_made < self.max_attempts {
            FailureOutcome::Retry {
                attempt: attempts_made + 1,
                delay: Duration::from_millis(self.backoff_ms),
            }
        } else {
            FailureOutcome::Exhausted {
                attempts: attempts_made,
                retained: self.retain_on_failure,
            }
        }
    }
}

/// Queue envelope around a [`ProcessingJob`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedJob {
    pub job: ProcessingJob,
    pub options: EnqueueOptions,
    pub attempts_made: u32,
    pub last_error: Option<String>,
}

impl QueuedJob {
    pub fn new(job: ProcessingJob, options: EnqueueOptions) -> Self {
        Self {
            job,
            options,
            attempts_made: 0,
            last_error: None,
        }
    }

    /// Envelope for the next delivery after a failed attempt.
    pub fn after_failure(&self, reason: &str) -> Self {
        Self {
            job: self.job.clone(),
            options: self.options.clone(),
            attempts_made: self.attempts_made + 1,
            last_error: Some(reason.to_string()),
        }
    }
}

/// Snapshot of queue depth per state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueStats {
    pub waiting: u64,
    pub delayed: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}
