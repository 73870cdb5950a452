//! HTTP admin server for the cache
//!
//! Exposes cache statistics, clearing and cleanup over a small REST API and
//! runs the periodic cleanup scheduler for as long as the server is up.

pub mod routes;
pub mod state;
pub mod types;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::{CacheRegistry, CleanupScheduler};
use crate::config::Config;
use state::AppState;

/// Default port for the server
pub const DEFAULT_PORT: u16 = 9876;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: "127.0.0.1".to_string(),
            cors_enabled: false,
        }
    }
}

/// Build the API router over shared state
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health & config
        .route("/api/health", get(routes::health::health_check))
        .route("/api/config", get(routes::config::get_config))
        .route("/api/config/cache", put(routes::config::update_cache_config))
        // Cache administration
        .route("/api/cache/stats", get(routes::cache::get_stats))
        .route("/api/cache/clear", post(routes::cache::clear_cache))
        .route("/api/cache/cleanup", post(routes::cache::run_cleanup))
        .with_state(state)
}

/// Start the HTTP server and the cleanup scheduler; returns after Ctrl-C
pub async fn start_server(
    config: ServerConfig,
    app_config: Config,
    config_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let cache = Arc::new(CacheRegistry::new(&app_config.cache));
    let cleanup_interval = Duration::from_secs(app_config.cache.cleanup_interval_secs);

    let mut state = AppState::new(app_config, Arc::clone(&cache));
    if let Some(path) = config_path {
        state = state.with_config_path(path);
    }

    let mut app = build_router(Arc::new(state)).layer(TraceLayer::new_for_http());

    // Add CORS if enabled
    if config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let scheduler = CleanupScheduler::start(cache, cleanup_interval);

    tracing::info!(%addr, "cache admin server listening");
    println!("Starting worker-cache server on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    scheduler.stop().await;
    served?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
