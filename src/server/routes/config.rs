//! Configuration endpoints

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};

use crate::config::{CacheConfig, Config};
use crate::server::state::AppState;
use crate::server::types::{ConfigResponse, ConfigUpdateResponse, ErrorResponse};

/// GET /api/config
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        cache: state.config.cache.clone(),
        config_path: state
            .config_path
            .as_ref()
            .map(|path| path.display().to_string()),
    })
}

/// PUT /api/config/cache
///
/// Validates and saves the cache section. The running registry keeps its
/// settings until the next start.
pub async fn update_cache_config(
    State(state): State<Arc<AppState>>,
    Json(cache): Json<CacheConfig>,
) -> Result<Json<ConfigUpdateResponse>, (StatusCode, Json<ErrorResponse>)> {
    cache.validate().map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.to_string(),
                code: "INVALID_CONFIG".to_string(),
            }),
        )
    })?;

    let Some(path) = state.config_path.clone() else {
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "Server was started without a writable config file".to_string(),
                code: "CONFIG_READ_ONLY".to_string(),
            }),
        ));
    };

    let config = Config {
        cache: cache.clone(),
    };
    config.save_to(&path).map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "failed to save config");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Failed to save config: {}", e),
                code: "CONFIG_SAVE_FAILED".to_string(),
            }),
        )
    })?;

    tracing::info!(path = %path.display(), "cache settings saved; restart to apply");

    Ok(Json(ConfigUpdateResponse {
        cache,
        saved_to: path.display().to_string(),
        restart_required: true,
    }))
}
