use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for every series the pipeline emits.
pub fn describe_pipeline_metrics() {
    metrics::describe_counter!("batch_jobs_submitted_total", "Batch jobs admitted");
    metrics::describe_counter!(
        "batch_jobs_completed_total",
        "Batch jobs that reached the complete state"
    );
    metrics::describe_gauge!("batch_jobs_running", "Batch jobs currently being processed");
    metrics::describe_counter!(
        "batch_images_processed_total",
        "Images processed, labelled by outcome (success, fetch, decode, transform, storage)"
    );
    metrics::describe_histogram!(
        "batch_image_processing_seconds",
        "Time to fetch, re-encode and store one image"
    );
    metrics::describe_counter!(
        "batch_webhook_failures_total",
        "Completion webhooks that could not be delivered"
    );
    metrics::describe_counter!(
        "batch_jobs_stalled_total",
        "Jobs abandoned after store writes failed, labelled by stage (start, record)"
    );
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
