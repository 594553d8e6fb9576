//! HTTP read API for the dashboard

use axum::{
    extract::{Query, State},
    Json,
};
use cached::proc_macro::cached;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::ApiError;
use super::AppState;
use crate::alert::{AlertRecord, LogEntry, SearchQuery, Stats};
use crate::db::{QueryService, StoreError};

const DEFAULT_RECENT_LIMIT: i64 = 50;
const MAX_RECENT_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<i64>,
}

/// API: most recent alerts for the initial page load
pub async fn api_recent_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<AlertRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    if limit <= 0 {
        return Err(ApiError::BadRequest("limit must be positive".to_string()));
    }
    let alerts = state.store.fetch_recent(limit.min(MAX_RECENT_LIMIT)).await?;
    Ok(Json(alerts))
}

/// API: investigator log search
pub async fn api_search_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<LogEntry>>, ApiError> {
    if let (Some(start), Some(end)) = (query.start_time, query.end_time) {
        if start > end {
            return Err(ApiError::BadRequest("start_time is after end_time".to_string()));
        }
    }
    let logs = state.store.search(&query).await?;
    Ok(Json(logs))
}

/// Cached stats query - 5 second TTL
#[cached(time = 5, key = "()", convert = r#"{ () }"#, result = true)]
async fn get_cached_stats(store: Arc<dyn QueryService>) -> Result<Stats, StoreError> {
    store.stats().await
}

/// API: dashboard counters (cached for 5 seconds)
pub async fn api_stats(State(state): State<Arc<AppState>>) -> Result<Json<Stats>, ApiError> {
    Ok(Json(get_cached_stats(state.store.clone()).await?))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub subscribers: usize,
    pub evicted_subscribers: u64,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        subscribers: state.hub.subscriber_count(),
        evicted_subscribers: state.hub.evicted_subscribers(),
    })
}
