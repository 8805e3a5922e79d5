//! SmartGuard API Server
//!
//! Serves anomaly predictions from the trained traffic model plus an
//! on-demand LAN device scan.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     SMARTGUARD API                       │
//! ├──────────────────────────────────────────────────────────┤
//! │  POST /predict ──▶ AnomalyDetector (loaded once, shared) │
//! │  GET  /scan    ──▶ ARP sweep on the local /24            │
//! │  GET  /health                                            │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod config;
mod error;
mod handlers;
mod scan;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use smartguard_model::AnomalyDetector;

pub use error::{AppError, AppResult};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smartguard_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env();

    tracing::info!("SmartGuard API starting...");
    tracing::info!("Model artifact: {}", config.model_path.display());

    // Load the model exactly once; a missing or corrupt artifact is fatal.
    let mut detector = AnomalyDetector::load(&config.model_path)
        .with_context(|| format!("failed to load model artifact {}", config.model_path.display()))?;
    if let Some(threshold) = config.threshold_override {
        tracing::info!("overriding calibrated threshold with {threshold}");
        detector = detector.with_threshold(threshold);
    }
    tracing::info!("model loaded (threshold {:.6})", detector.threshold());

    // Build application state
    let state = AppState {
        detector: Arc::new(detector),
        config: config.clone(),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub detector: Arc<AnomalyDetector>,
    pub config: config::Config,
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::check))
        .route("/predict", post(handlers::predict::predict))
        .route("/scan", get(handlers::scan::scan))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
