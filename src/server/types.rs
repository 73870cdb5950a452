//! Server types and DTOs
//!
//! This module defines the types used for API requests and responses.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cache::{CleanupSummary, Namespace, NamespaceStats, StatsReport, StatsTotals};
use crate::config::CacheConfig;

/// `?type=` selector shared by the cache endpoints
#[derive(Debug, Default, Deserialize)]
pub struct CacheTypeQuery {
    #[serde(rename = "type")]
    pub cache_type: Option<String>,
}

/// Stats for one namespace as reported over HTTP
#[derive(Debug, Serialize)]
pub struct NamespaceStatsDto {
    #[serde(flatten)]
    pub stats: NamespaceStats,
    /// Percentage of lookups served from cache since process start
    pub hit_rate: f64,
}

/// Response for GET /api/cache/stats
#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub namespaces: BTreeMap<Namespace, NamespaceStatsDto>,
    pub totals: StatsTotals,
    pub hit_rate: f64,
}

impl From<StatsReport> for CacheStatsResponse {
    fn from(report: StatsReport) -> Self {
        let lookups = report.totals.hit_count + report.totals.miss_count;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            report.totals.hit_count as f64 / lookups as f64 * 100.0
        };

        Self {
            namespaces: report
                .namespaces
                .into_iter()
                .map(|(namespace, stats)| {
                    let hit_rate = stats.hit_rate();
                    (namespace, NamespaceStatsDto { stats, hit_rate })
                })
                .collect(),
            totals: report.totals,
            hit_rate,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub enabled_caches: Vec<Namespace>,
}

/// Config response
#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub cache: CacheConfig,
    /// Where `PUT /api/config/cache` persists changes, if anywhere
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

/// Response for PUT /api/config/cache
#[derive(Debug, Serialize)]
pub struct ConfigUpdateResponse {
    pub cache: CacheConfig,
    pub saved_to: String,
    /// Settings take effect on the next start
    pub restart_required: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Error body for POST /api/cache/cleanup when some namespace failed.
/// Carries the full summary so work done in the other namespaces is visible.
#[derive(Debug, Serialize)]
pub struct CleanupFailedResponse {
    pub error: String,
    pub code: String,
    #[serde(flatten)]
    pub summary: CleanupSummary,
}
