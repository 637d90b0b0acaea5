//! Response cache browsing and maintenance API handlers

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::models::{CacheEntryRow, CacheStats, CleanupReport, JobEntryRow, JobStatus, Page};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 20;
const DEFAULT_CLEANUP_DAYS: u32 = 0;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EntriesQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct JobsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
}

/// Validate 1-based page and positive limit
fn pagination(page: Option<i64>, limit: Option<i64>) -> ApiResult<(u32, u32)> {
    let page = page.unwrap_or(1);
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);

    let page = u32::try_from(page)
        .ok()
        .filter(|p| *p >= 1)
        .ok_or_else(|| ApiError::BadRequest("page must be >= 1".to_string()))?;
    let limit = u32::try_from(limit)
        .ok()
        .filter(|l| *l > 0)
        .ok_or_else(|| ApiError::BadRequest("limit must be > 0".to_string()))?;

    Ok((page, limit))
}

/// GET /cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}

/// GET /cache/entries?page&limit&search
pub async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<EntriesQuery>,
) -> ApiResult<Json<Page<CacheEntryRow>>> {
    let (page, limit) = pagination(query.page, query.limit)?;
    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());

    Ok(Json(state.cache.list_entries(page, limit, search).await))
}

/// GET /cache/jobs?page&limit&status
pub async fn list_job_entries(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> ApiResult<Json<Page<JobEntryRow>>> {
    let (page, limit) = pagination(query.page, query.limit)?;
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(s) => Some(s.parse::<JobStatus>().map_err(ApiError::BadRequest)?),
    };

    Ok(Json(state.cache.list_jobs(page, limit, status).await))
}

#[derive(Debug, Deserialize)]
pub struct DeleteEntriesRequest {
    #[serde(default)]
    pub ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteJobsRequest {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub message: String,
    pub deleted_count: u64,
}

/// DELETE /cache/entries {ids}
pub async fn delete_entries(
    State(state): State<AppState>,
    Json(request): Json<DeleteEntriesRequest>,
) -> ApiResult<Json<DeleteResponse>> {
    if request.ids.is_empty() {
        return Err(ApiError::BadRequest("ids must be a non-empty array".to_string()));
    }

    let deleted_count = state.cache.delete_entries(&request.ids).await;
    Ok(Json(DeleteResponse {
        message: format!("Deleted {} cache entries", deleted_count),
        deleted_count,
    }))
}

/// DELETE /cache/jobs {ids}
pub async fn delete_jobs(
    State(state): State<AppState>,
    Json(request): Json<DeleteJobsRequest>,
) -> ApiResult<Json<DeleteResponse>> {
    if request.ids.is_empty() {
        return Err(ApiError::BadRequest("ids must be a non-empty array".to_string()));
    }

    let deleted_count = state.cache.delete_job_entries(&request.ids).await;
    Ok(Json(DeleteResponse {
        message: format!("Deleted {} jobs", deleted_count),
        deleted_count,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CleanupRequest {
    pub days_old: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub message: String,
    pub days_old: u32,
    pub removed: CleanupReport,
}

/// POST /cache/cleanup {daysOld?}
///
/// A missing body or `daysOld` clears everything not touched since now.
pub async fn cleanup(
    State(state): State<AppState>,
    request: Option<Json<CleanupRequest>>,
) -> Json<CleanupResponse> {
    let days_old = request
        .and_then(|Json(r)| r.days_old)
        .unwrap_or(DEFAULT_CLEANUP_DAYS);
    let removed = state.cache.cleanup(days_old).await;

    Json(CleanupResponse {
        message: format!(
            "Removed {} cache entries and {} jobs older than {} days",
            removed.entries, removed.jobs, days_old
        ),
        days_old,
        removed,
    })
}

pub fn cache_routes() -> Router<AppState> {
    Router::new()
        .route("/cache/stats", get(cache_stats))
        .route("/cache/entries", get(list_entries).delete(delete_entries))
        .route("/cache/jobs", get(list_job_entries).delete(delete_jobs))
        .route("/cache/cleanup", post(cleanup))
}
