use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use crate::models::job::FailureOutcome;
use crate::services::processor::ImageProcessor;
use crate::services::queue::{JobQueue, QueueError};

/// Take one job off the queue and run it through the processor.
/// Returns Ok(true) if a job was handled, Ok(false) if the queue was empty.
///
/// Jobs whose lease expired are recovered first; those with no attempts
/// left are abandoned so their records do not stay PROCESSING.
pub async fn process_next_job(
    queue: &dyn JobQueue,
    processor: &ImageProcessor,
) -> Result<bool, QueueError> {
    for (stalled, outcome) in queue.recover_stalled().await? {
        match outcome {
            FailureOutcome::Retry { .. } => {
                metrics::counter!("image_jobs_retried").increment(1);
            }
            FailureOutcome::Exhausted { .. } => {
                processor.abandon(&stalled.job).await;
                metrics::counter!("image_jobs_failed").increment(1);
            }
        }
        metrics::counter!("image_jobs_stalled").increment(1);
    }

    let queued = match queue.dequeue().await? {
        Some(j) => j,
        None => return Ok(false),
    };

    debug!(
        image_id = %queued.job.image_id,
        attempt = queued.attempts_made + 1,
        "Dequeued processing job"
    );

    match processor.handle(&queued.job).await {
        Ok(_) => {
            queue.complete(&queued).await?;
            metrics::counter!("image_jobs_completed").increment(1);
        }
        Err(e) => match queue.fail(&queued, &e.to_string()).await? {
            FailureOutcome::Retry { .. } => {
                metrics::counter!("image_jobs_retried").increment(1);
            }
            FailureOutcome::Exhausted { .. } => {
                metrics::counter!("image_jobs_failed").increment(1);
            }
        },
    }

    Ok(true)
}

/// Fixed set of workers polling the queue until shutdown is signalled.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    processor: Arc<ImageProcessor>,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        processor: Arc<ImageProcessor>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            processor,
            concurrency: concurrency.max(1),
            poll_interval,
        }
    }

    /// Run workers until `shutdown` flips to true or its sender is dropped.
    ///
    /// A job already in progress is finished before its worker exits.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(concurrency = self.concurrency, "Starting worker pool");

        let mut workers = JoinSet::new();
        for worker_id in 0..self.concurrency {
            workers.spawn(worker_loop(
                worker_id,
                self.queue.clone(),
                self.processor.clone(),
                self.poll_interval,
                shutdown.clone(),
            ));
        }

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker task panicked");
            }
        }

        info!("Worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<dyn JobQueue>,
    processor: Arc<ImageProcessor>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id, "Worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let idle = match process_next_job(queue.as_ref(), &processor).await {
            Ok(true) => false,
            Ok(false) => {
                trace!(worker_id, "No jobs available, sleeping");
                true
            }
            Err(e) => {
                warn!(worker_id, error = %e, "Queue error, backing off");
                true
            }
        };

        if idle {
            if worker_id == 0 {
                if let Ok(stats) = queue.stats().await {
                    metrics::gauge!("image_queue_waiting").set(stats.waiting as f64);
                }
            }
            tokio::select! {
                _ = sleep(poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    debug!(worker_id, "Worker stopped");
}
