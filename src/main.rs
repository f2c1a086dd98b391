use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use face_screen::app_state::AppState;
use face_screen::config::AppConfig;
use face_screen::routes;
use face_screen::services::engine::Engine;
use face_screen::services::sweeper::RetentionSweeper;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing face-screen server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    metrics::describe_counter!("face_jobs_submitted_total", "Total screening jobs submitted");
    metrics::describe_counter!(
        "face_jobs_finished_total",
        "Screening jobs that reached a terminal state, by status"
    );
    metrics::describe_counter!("face_rows_processed_total", "Rows processed, by outcome");
    metrics::describe_histogram!("face_row_seconds", "Time to fetch and classify one row");
    metrics::describe_counter!(
        "face_checkpoint_failures_total",
        "Partial result writes that failed"
    );
    metrics::describe_counter!(
        "face_sweep_deleted_total",
        "Expired artifacts removed by the retention sweeper"
    );
    metrics::describe_gauge!("face_active_jobs", "Jobs currently being driven");

    for dir in config.managed_roots() {
        tokio::fs::create_dir_all(&dir)
            .await
            .unwrap_or_else(|e| panic!("Failed to create {}: {e}", dir.display()));
    }

    tracing::info!(
        primary = %config.primary_model,
        fallback = %config.fallback_model,
        "Initializing Workers AI face detectors"
    );
    let engine = Engine::from_config(&config).expect("Failed to initialize screening engine");

    // Stale uploads, results and no-face images are removed in the background
    let shutdown = CancellationToken::new();
    let sweeper = RetentionSweeper::new(
        config.managed_roots(),
        config.retention_ttl(),
        config.sweep_interval(),
    );
    let sweeper_handle = sweeper.spawn(shutdown.clone());

    let bind_addr = config.bind_addr.clone();
    let body_limit = config.max_upload_bytes;
    let state = AppState::new(engine, config).with_prometheus(prometheus_handle);

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(body_limit));

    tracing::info!("Starting face-screen on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Received SIGINT, shutting down");
            signal.cancel();
        })
        .await
        .expect("Server error");

    shutdown.cancel();
    sweeper_handle.await.ok();
}
