//! Visual Neurons API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Session resolution and authentication
//! - Image and video generation routing
//! - Media serving and gallery management
//! - Webhook and reconciliation-driven video completion
//! - Observability (logging, metrics, tracing)

mod extract;
mod handlers;
mod middleware;
mod services;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use visualneurons_common::{
    auth::JwtManager, config::AppConfig, db::DbPool, metrics, Gateway, MediaStore,
};

/// Maximum accepted upload size (25 MB)
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub store: MediaStore,
    pub gateway: Arc<Gateway>,
    pub jwt: Option<JwtManager>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    let config = Arc::new(config);

    // Initialize tracing
    init_tracing(&config);

    info!(
        "Starting Visual Neurons API Gateway v{}",
        visualneurons_common::VERSION
    );

    // Initialize metrics
    metrics::register_metrics();
    if config.observability.metrics_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(format!(
                    "{}_request_duration_seconds",
                    metrics::METRICS_PREFIX
                )),
                metrics::LATENCY_BUCKETS,
            )?
            .set_buckets_for_metric(
                Matcher::Full(format!(
                    "{}_generation_duration_seconds",
                    metrics::METRICS_PREFIX
                )),
                metrics::GENERATION_BUCKETS,
            )?
            .with_http_listener(addr)
            .install()?;
        info!("Metrics exporter listening on {}", addr);
    }

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;

    // Media storage
    let store = MediaStore::new(config.media.root.clone());

    // Provider gateway
    let gateway = Arc::new(Gateway::from_config(&config.providers).await?);
    let enabled = gateway.enabled_image_providers();
    if enabled.is_empty() {
        warn!("No image providers configured; generation endpoints will reject requests");
    } else {
        info!(
            providers = ?enabled.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
            video = gateway.video_enabled(),
            "Provider gateway initialized"
        );
    }

    if config.webhook_mode() {
        info!("Video completion mode: webhook");
    } else {
        info!("Video completion mode: polling");
    }

    // Create app state
    let state = AppState {
        config: config.clone(),
        db,
        store,
        gateway,
        jwt: config.auth.jwt_secret.as_deref().map(JwtManager::new),
    };

    // Reconciliation sweep for stuck webhook-mode predictions
    if config.webhook_mode() && config.video.reconcile_interval_secs > 0 {
        tokio::spawn(services::reconcile::run_sweeper(state.clone()));
    }

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    if config.observability.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Rate limiter shared across requests
    let limiter = middleware::rate_limit::create_rate_limiter(
        state.config.rate_limit.requests_per_second,
        state.config.rate_limit.burst,
    );
    let rate_limiting = state.config.rate_limit.enabled;

    // API routes
    let api_routes = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Image endpoints
        .route("/images", post(handlers::images::generate_image))
        .route("/images/edit", post(handlers::images::edit_image))
        .route("/images/upload", post(handlers::images::upload_image))
        .route("/images/{id}", get(handlers::images::get_image))
        .route("/images/{id}/save", post(handlers::images::save_image))
        .route("/images/{id}", delete(handlers::images::delete_image))
        .route("/gallery", get(handlers::images::gallery))
        // Media serving
        .route("/media/{*path}", get(handlers::media::serve_media))
        // Video endpoints
        .route("/videos", post(handlers::videos::create_video))
        .route("/predictions/{id}", get(handlers::predictions::get_prediction))
        .route("/webhooks/replicate", post(handlers::webhooks::replicate_webhook))
        // Usage and advisory endpoints
        .route("/usage", get(handlers::usage::get_usage))
        .route("/masks", post(handlers::masks::create_mask))
        .route("/prompts/improve", post(handlers::prompts::improve_prompt));

    let api_routes = if rate_limiting {
        api_routes.layer(axum::middleware::from_fn(move |request, next| {
            let limiter = limiter.clone();
            async move { middleware::rate_limit::rate_limit_middleware(request, next, limiter).await }
        }))
    } else {
        api_routes
    };

    // Compose the app
    Router::new()
        .nest("/v1", api_routes)
        .layer(axum::middleware::from_fn(
            middleware::telemetry::track_requests,
        ))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
