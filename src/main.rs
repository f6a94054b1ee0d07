use axum::routing::get;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use image_keyword_worker::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::worker::Worker,
    telemetry,
};

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing image keyword server");

    let prometheus_handle = Arc::new(
        telemetry::init_metrics().expect("Failed to install Prometheus metrics recorder"),
    );

    let state = AppState::connect(&config)
        .await
        .expect("Failed to connect to backing services");

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .expect("Failed to create upload directory");

    // The queue is shared, so a dedicated worker process can run instead
    let worker = if config.embedded_worker {
        let pipeline = state.pipeline(&config).expect("Failed to build pipeline");
        tokio::fs::create_dir_all(pipeline.download_dir())
            .await
            .expect("Failed to create download directory");
        tracing::info!("Starting embedded worker");
        Some(Worker::new(state.queue.clone(), Arc::new(pipeline), config.worker()).start())
    } else {
        None
    };

    let app = routes::router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    if let Some(worker) = worker {
        worker.shutdown().await;
    }
    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
