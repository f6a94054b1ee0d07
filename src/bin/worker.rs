use image_keyword_worker::{
    app_state::AppState,
    config::AppConfig,
    services::worker::Worker,
    telemetry,
};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    tracing::info!("Starting image processing worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    let state = AppState::connect(&config)
        .await
        .expect("Failed to connect to backing services");

    let pipeline = state.pipeline(&config).expect("Failed to build pipeline");
    tokio::fs::create_dir_all(pipeline.download_dir())
        .await
        .expect("Failed to create download directory");

    let handle = Worker::new(state.queue.clone(), Arc::new(pipeline), config.worker()).start();

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    tracing::info!("Shutdown signal received, draining jobs");
    handle.shutdown().await;
}
