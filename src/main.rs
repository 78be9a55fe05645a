use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use product_image_batch::{
    app_state::AppState,
    config::{AppConfig, OutputBackend},
    db,
    routes,
    services::{
        admission::JobAdmission,
        fetch::ImageProcessor,
        notifier::WebhookNotifier,
        result_store::PgResultStore,
        storage::{LocalOutputStore, OutputStore, R2OutputStore, StorageError},
        worker::JobWorker,
    },
};

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

    tracing::info!("Initializing product-image-batch server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_pipeline_metrics();

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let results = Arc::new(PgResultStore::new(db_pool));

    tracing::info!(backend = ?config.output_backend, "Initializing output store");
    let outputs = build_output_store(&config).expect("Failed to initialize output store");

    let processor = ImageProcessor::new(
        Duration::from_secs(config.fetch_timeout_secs),
        config.max_image_bytes,
    )
    .expect("Failed to initialize image fetch client");

    if config.webhook_url.is_none() {
        tracing::warn!("WEBHOOK_URL not set, completion notifications are disabled");
    }
    let notifier = WebhookNotifier::new(
        config.webhook_url.clone(),
        Duration::from_secs(config.notify_timeout_secs),
    )
    .expect("Failed to initialize webhook client");

    let worker = JobWorker::new(
        results.clone(),
        outputs,
        Arc::new(processor),
        Arc::new(notifier),
        config.max_concurrent_fetches,
    );
    let admission = JobAdmission::new(results.clone(), worker);

    // Create shared application state
    let state = AppState::new(results, admission);

    let app = routes::api_router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024)); // 10 MB limit

    tracing::info!("Starting product-image-batch on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}

fn build_output_store(config: &AppConfig) -> Result<Arc<dyn OutputStore>, StorageError> {
    match config.output_backend {
        OutputBackend::Local => Ok(Arc::new(LocalOutputStore::new(
            &config.output_dir,
            config.public_base_url.clone(),
        ))),
        OutputBackend::R2 => {
            let required = |value: &Option<String>, name: &str| {
                value
                    .clone()
                    .ok_or_else(|| StorageError::Config(format!("{name} is required for the r2 backend")))
            };
            let store = R2OutputStore::new(
                &required(&config.r2_bucket, "R2_BUCKET")?,
                &required(&config.r2_endpoint, "R2_ENDPOINT")?,
                &required(&config.r2_access_key, "R2_ACCESS_KEY")?,
                &required(&config.r2_secret_key, "R2_SECRET_KEY")?,
                config.public_base_url.clone(),
            )?;
            Ok(Arc::new(store))
        }
    }
}
