use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics: upload and processing counters in Prometheus text format.
pub async fn prometheus_metrics(
    State(handle): State<Arc<PrometheusHandle>>,
) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for the metrics emitted by the API and the worker.
pub fn describe_metrics() {
    metrics::describe_counter!("image_uploads_total", "Uploads accepted for processing");
    metrics::describe_counter!(
        "image_uploads_rejected_total",
        "Uploads rejected by file validation"
    );
    metrics::describe_counter!(
        "image_upload_failures_total",
        "Uploads that failed after validation"
    );
    metrics::describe_counter!("image_jobs_completed", "Processing jobs completed");
    metrics::describe_counter!("image_jobs_retried", "Processing attempts scheduled for retry");
    metrics::describe_counter!(
        "image_jobs_failed",
        "Processing jobs that exhausted their attempts"
    );
    metrics::describe_counter!(
        "image_jobs_stalled",
        "Processing jobs recovered after their lease expired"
    );
    metrics::describe_histogram!(
        "image_processing_seconds",
        "Time to transform and store one image"
    );
    metrics::describe_gauge!("image_queue_waiting", "Jobs waiting in the processing queue");
}
