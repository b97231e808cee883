use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::job::{
    EnqueueOptions, FailureOutcome, ProcessingJob, QueueStats, QueuedJob,
};

const WAITING_KEY: &str = "image_ingest:waiting";
const ACTIVE_KEY: &str = "image_ingest:active";
const DELAYED_KEY: &str = "image_ingest:delayed";
const FAILED_KEY: &str = "image_ingest:failed";
const COMPLETED_COUNT_KEY: &str = "image_ingest:completed_count";
const LEASES_KEY: &str = "image_ingest:leases";

/// How long a dequeued job may stay active before it counts as stalled.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(300);

/// Failure reason recorded for a job whose lease ran out.
pub const STALLED_REASON: &str = "job stalled";

// Move the next waiting job to active and lease it in one step
const DEQUEUE_SCRIPT: &str = r#"
local payload = redis.call('RPOPLPUSH', KEYS[1], KEYS[2])
if payload then
    redis.call('ZADD', KEYS[3], ARGV[1], payload)
end
return payload
"#;

fn dedup_key(image_id: Uuid) -> String {
    format!("image_ingest:job:{}", image_id)
}

/// Job queue for image processing.
///
/// At most one live job exists per image id; a second enqueue for the same
/// id is rejected with [`QueueError::DuplicateJob`].
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        job: &ProcessingJob,
        options: &EnqueueOptions,
    ) -> Result<(), QueueError>;

    /// Take the next ready job, mark it active and lease it.
    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError>;

    /// Acknowledge a successfully processed job.
    async fn complete(&self, job: &QueuedJob) -> Result<(), QueueError>;

    /// Record a failed attempt and apply the job's redelivery policy.
    async fn fail(&self, job: &QueuedJob, reason: &str) -> Result<FailureOutcome, QueueError>;

    /// Fail every active job whose lease has expired, as if its worker had
    /// reported [`STALLED_REASON`]. Returns the recovered jobs and outcomes.
    async fn recover_stalled(&self) -> Result<Vec<(QueuedJob, FailureOutcome)>, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;
}

/// Redis-backed job queue with delayed retry support.
///
/// Layout: `waiting` and `active` lists, a `delayed` sorted set scored by
/// the ready-at timestamp in milliseconds, a `failed` hash of retained jobs
/// keyed by image id, and one `SET NX` dedup key per live job. Active jobs
/// also sit in a `leases` sorted set scored by their lease deadline.
pub struct RedisJobQueue {
    client: redis::Client,
    lease: Duration,
}

impl RedisJobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            lease: DEFAULT_LEASE,
        })
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Move delayed jobs whose backoff has elapsed back to the waiting list.
    async fn promote_due_jobs(&self, conn: &mut MultiplexedConnection) -> Result<(), QueueError> {
        let now = chrono::Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore(DELAYED_KEY, 0, now)
            .await
            .map_err(QueueError::Redis)?;

        for payload in due {
            // Only the consumer that wins the ZREM re-queues the job
            let removed: u64 = conn
                .zrem(DELAYED_KEY, &payload)
                .await
                .map_err(QueueError::Redis)?;
            if removed == 1 {
                conn.lpush::<_, _, ()>(WAITING_KEY, &payload)
                    .await
                    .map_err(QueueError::Redis)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(
        &self,
        job: &ProcessingJob,
        options: &EnqueueOptions,
    ) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&QueuedJob::new(job.clone(), options.clone()))
            .map_err(QueueError::Serialize)?;

        let admitted: bool = conn
            .set_nx(dedup_key(job.image_id), 1)
            .await
            .map_err(QueueError::Redis)?;
        if !admitted {
            return Err(QueueError::DuplicateJob(job.image_id));
        }

        if let Err(e) = conn.lpush::<_, _, ()>(WAITING_KEY, &payload).await {
            // Release the key so the image can be enqueued again
            if let Err(del_err) = conn.del::<_, ()>(dedup_key(job.image_id)).await {
                warn!(
                    image_id = %job.image_id,
                    error = %del_err,
                    "Failed to release dedup key after enqueue error"
                );
            }
            return Err(QueueError::Redis(e));
        }

        info!(image_id = %job.image_id, "Enqueued image processing job");
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self.connection().await?;
        self.promote_due_jobs(&mut conn).await?;

        let deadline = chrono::Utc::now().timestamp_millis() + self.lease.as_millis() as i64;
        let result: Option<String> = redis::Script::new(DEQUEUE_SCRIPT)
            .key(WAITING_KEY)
            .key(ACTIVE_KEY)
            .key(LEASES_KEY)
            .arg(deadline)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        match result {
            Some(payload) => {
                let job: QueuedJob =
                    serde_json::from_str(&payload).map_err(QueueError::Serialize)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.zrem::<_, _, ()>(LEASES_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        conn.lrem::<_, _, ()>(ACTIVE_KEY, 1, &payload)
            .await
            .map_err(QueueError::Redis)?;
        conn.incr::<_, _, ()>(COMPLETED_COUNT_KEY, 1)
            .await
            .map_err(QueueError::Redis)?;

        if job.options.discard_on_success {
            conn.del::<_, ()>(dedup_key(job.job.image_id))
                .await
                .map_err(QueueError::Redis)?;
        }
        Ok(())
    }

    async fn fail(&self, job: &QueuedJob, reason: &str) -> Result<FailureOutcome, QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.zrem::<_, _, ()>(LEASES_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        conn.lrem::<_, _, ()>(ACTIVE_KEY, 1, &payload)
            .await
            .map_err(QueueError::Redis)?;

        apply_failure(&mut conn, job, reason).await
    }

    async fn recover_stalled(&self) -> Result<Vec<(QueuedJob, FailureOutcome)>, QueueError> {
        let mut conn = self.connection().await?;
        let now = chrono::Utc::now().timestamp_millis();
        let expired: Vec<String> = conn
            .zrangebyscore(LEASES_KEY, 0, now)
            .await
            .map_err(QueueError::Redis)?;

        let mut recovered = Vec::new();
        for payload in expired {
            // Only the consumer that wins the ZREM recovers the job
            let removed: u64 = conn
                .zrem(LEASES_KEY, &payload)
                .await
                .map_err(QueueError::Redis)?;
            if removed != 1 {
                continue;
            }
            conn.lrem::<_, _, ()>(ACTIVE_KEY, 1, &payload)
                .await
                .map_err(QueueError::Redis)?;

            let job: QueuedJob = serde_json::from_str(&payload).map_err(QueueError::Serialize)?;
            warn!(
                image_id = %job.job.image_id,
                attempt = job.attempts_made + 1,
                "Job lease expired, recovering stalled job"
            );
            let outcome = apply_failure(&mut conn, &job, STALLED_REASON).await?;
            recovered.push((job, outcome));
        }
        Ok(recovered)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.connection().await?;
        let waiting: u64 = conn.llen(WAITING_KEY).await.map_err(QueueError::Redis)?;
        let delayed: u64 = conn.zcard(DELAYED_KEY).await.map_err(QueueError::Redis)?;
        let active: u64 = conn.llen(ACTIVE_KEY).await.map_err(QueueError::Redis)?;
        let completed: Option<u64> = conn
            .get(COMPLETED_COUNT_KEY)
            .await
            .map_err(QueueError::Redis)?;
        let failed: u64 = conn.hlen(FAILED_KEY).await.map_err(QueueError::Redis)?;

        Ok(QueueStats {
            waiting,
            delayed,
            active,
            completed: completed.unwrap_or(0),
            failed,
        })
    }
}

/// Schedule a retry or park the job as failed, per its redelivery policy.
async fn apply_failure(
    conn: &mut MultiplexedConnection,
    job: &QueuedJob,
    reason: &str,
) -> Result<FailureOutcome, QueueError> {
    let next = job.after_failure(reason);
    let next_payload = serde_json::to_string(&next).map_err(QueueError::Serialize)?;
    let outcome = job.options.on_failure(next.attempts_made);

    match &outcome {
        FailureOutcome::Retry { attempt, delay } => {
            let ready_at = chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;
            conn.zadd::<_, _, _, ()>(DELAYED_KEY, &next_payload, ready_at)
                .await
                .map_err(QueueError::Redis)?;
            info!(
                image_id = %job.job.image_id,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Job scheduled for retry"
            );
        }
        FailureOutcome::Exhausted { attempts, retained } => {
            if *retained {
                // The dedup key stays while the job is kept for inspection
                conn.hset::<_, _, _, ()>(
                    FAILED_KEY,
                    job.job.image_id.to_string(),
                    &next_payload,
                )
                .await
                .map_err(QueueError::Redis)?;
            } else {
                conn.del::<_, ()>(dedup_key(job.job.image_id))
                    .await
                    .map_err(QueueError::Redis)?;
            }
            warn!(
                image_id = %job.job.image_id,
                attempts = attempts,
                retained = retained,
                "Job failed after max attempts"
            );
        }
    }

    Ok(outcome)
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("A processing job for image {0} is already queued")]
    DuplicateJob(Uuid),
}
