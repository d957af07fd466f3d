//! Cache statistics endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use cache::CacheMetrics;
use serde::Deserialize;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    /// Restrict the response to one key.
    pub key: Option<String>,
}

/// `GET /cache/stats`: per-key hit/miss counters, sorted by key.
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Json<Vec<CacheMetrics>> {
    let stats = &state.cache_statistics;
    match query.key {
        Some(key) => Json(vec![stats.metrics(&key)]),
        None => Json(stats.all()),
    }
}
