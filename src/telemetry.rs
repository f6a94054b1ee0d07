use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

/// Initialize structured JSON logging, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
}

/// Install the Prometheus recorder and register application metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    metrics::describe_counter!("image_jobs_enqueued_total", "Image jobs submitted");
    metrics::describe_counter!("image_jobs_completed_total", "Image jobs completed");
    metrics::describe_counter!("image_jobs_failed_total", "Image jobs that failed");
    metrics::describe_counter!(
        "image_pipeline_degraded_total",
        "Pipeline stages that fell back to an empty result"
    );
    metrics::describe_counter!("image_fetch_failures_total", "Related image downloads that failed");
    metrics::describe_histogram!(
        "image_job_processing_seconds",
        "Time to run an image job through the pipeline"
    );
    metrics::describe_gauge!("image_queue_depth", "Jobs waiting to be claimed");

    Ok(handle)
}
