//! Cache administration endpoints

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};

use crate::cache::{ClearReport, ClearTarget, CleanupSummary};
use crate::server::state::AppState;
use crate::server::types::{
    CacheStatsResponse, CacheTypeQuery, CleanupFailedResponse, ErrorResponse,
};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Missing `type` means every namespace
fn parse_target(query: &CacheTypeQuery) -> Result<ClearTarget, ApiError> {
    let Some(raw) = query.cache_type.as_deref() else {
        return Ok(ClearTarget::All);
    };

    raw.parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!(
                    "Unknown cache type '{}': expected url, llm, prompt, translate, tool or all",
                    raw
                ),
                code: "INVALID_CACHE_TYPE".to_string(),
            }),
        )
    })
}

/// GET /api/cache/stats
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CacheTypeQuery>,
) -> Result<Json<CacheStatsResponse>, ApiError> {
    let target = parse_target(&query)?;
    let report = state.cache.stats(target).await;
    Ok(Json(report.into()))
}

/// POST /api/cache/clear?type=...
pub async fn clear_cache(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CacheTypeQuery>,
) -> Result<Json<ClearReport>, ApiError> {
    let target = parse_target(&query)?;

    state.cache.clear(target).await.map(Json).map_err(|e| {
        tracing::error!(%target, error = %e, "cache clear failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Failed to clear cache: {}", e),
                code: "CACHE_CLEAR_FAILED".to_string(),
            }),
        )
    })
}

/// POST /api/cache/cleanup
pub async fn run_cleanup(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CleanupSummary>, (StatusCode, Json<CleanupFailedResponse>)> {
    cleanup_response(state.cache.cleanup().await)
}

fn cleanup_response(
    summary: CleanupSummary,
) -> Result<Json<CleanupSummary>, (StatusCode, Json<CleanupFailedResponse>)> {
    if summary.is_ok() {
        return Ok(Json(summary));
    }

    let failed = summary
        .errors
        .iter()
        .map(|(namespace, message)| format!("{}: {}", namespace, message))
        .collect::<Vec<_>>()
        .join("; ");
    Err((
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(CleanupFailedResponse {
            error: format!("Cache cleanup failed for {}", failed),
            code: "CACHE_CLEANUP_FAILED".to_string(),
            summary,
        }),
    ))
}
