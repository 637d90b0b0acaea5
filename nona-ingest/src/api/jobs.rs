//! Job submission and status API handlers
//!
//! POST /process, GET /playlist-info, GET /jobs, GET /jobs/:id,
//! POST /album-art/fetch

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::models::{Job, JobKind};
use crate::services::source::{is_collection_reference, normalize_reference};
use crate::services::SourceError;
use crate::AppState;

/// POST /process request; `url` and `prompt` are accepted interchangeably
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProcessRequest {
    pub url: Option<String>,
    pub prompt: Option<String>,
}

impl ProcessRequest {
    fn reference(&self) -> Option<&str> {
        self.url
            .as_deref()
            .or(self.prompt.as_deref())
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub message: String,
    pub job_id: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub status_url: String,
}

impl JobAccepted {
    fn new(message: &str, job_id: String, kind: JobKind, url: Option<String>) -> Self {
        let status_url = format!("/jobs/{}", job_id);
        Self {
            message: message.to_string(),
            job_id,
            kind,
            url,
            status_url,
        }
    }
}

/// POST /process
///
/// Creates a job and processes the reference in the background.
pub async fn start_processing(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> ApiResult<Json<JobAccepted>> {
    let reference = request
        .reference()
        .map(normalize_reference)
        .ok_or_else(|| ApiError::BadRequest("URL or prompt is required".to_string()))?;

    let kind = if is_collection_reference(&reference) {
        JobKind::Collection
    } else {
        JobKind::Single
    };

    let job_id = state.tracker.create_job(kind, Some(reference.clone())).await;
    tracing::info!(job_id = %job_id, kind = %kind, url = %reference, "Processing job accepted");

    let orchestrator = Arc::clone(&state.orchestrator);
    let id = job_id.clone();
    let target = reference.clone();
    state.tasks.spawn(job_id.clone(), async move {
        match kind {
            JobKind::Collection => orchestrator.run_collection(&id, &target).await,
            _ => orchestrator.run_single(&id, &target).await,
        }
    });

    Ok(Json(JobAccepted::new(
        "Processing started",
        job_id,
        kind,
        Some(reference),
    )))
}

#[derive(Debug, Deserialize)]
pub struct PlaylistInfoQuery {
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub is_playlist: bool,
    pub video_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /playlist-info?url=
///
/// Listing failures still answer 200 with an approximate description so
/// the client can proceed with the submission.
pub async fn playlist_info(
    State(state): State<AppState>,
    Query(query): Query<PlaylistInfoQuery>,
) -> ApiResult<Json<PlaylistInfo>> {
    let reference = query
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(normalize_reference)
        .ok_or_else(|| ApiError::BadRequest("URL is required".to_string()))?;

    if !is_collection_reference(&reference) {
        return Ok(Json(PlaylistInfo {
            is_playlist: false,
            video_count: Some(0),
            title: None,
            message: "URL is not a playlist".to_string(),
            warning: None,
            error: None,
        }));
    }

    let resolver = &state.pipeline.collaborators().resolver;
    let info = match resolver.resolve_collection(&reference).await {
        Ok(collection) => {
            let count = collection.members.len();
            PlaylistInfo {
                is_playlist: true,
                video_count: Some(count),
                title: Some(collection.title.unwrap_or_else(|| "Unknown Playlist".to_string())),
                message: format!("Playlist contains {} videos", count),
                warning: None,
                error: None,
            }
        }
        Err(SourceError::CollectionTimeout(secs)) => PlaylistInfo {
            is_playlist: true,
            video_count: None,
            title: Some("Unknown Playlist (Large)".to_string()),
            message: "Playlist is too large to count quickly".to_string(),
            warning: Some(format!(
                "Listing timed out after {} seconds; processing may take a long time",
                secs
            )),
            error: None,
        },
        Err(e) => {
            tracing::warn!(url = %reference, error = %e, "Playlist info lookup failed");
            PlaylistInfo {
                is_playlist: true,
                video_count: None,
                title: Some("Unknown Playlist".to_string()),
                message: "Unable to determine playlist size".to_string(),
                warning: None,
                error: Some(e.to_string()),
            }
        }
    };

    Ok(Json(info))
}

#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<Job>,
}

/// GET /jobs, most recent first
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobsResponse> {
    Json(JobsResponse {
        jobs: state.tracker.all_jobs().await,
    })
}

/// GET /jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    state
        .tracker
        .get_job(&job_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))
}

/// POST /album-art/fetch
///
/// Starts a maintenance job that backfills missing album covers.
pub async fn fetch_album_art(State(state): State<AppState>) -> Json<JobAccepted> {
    let job_id = state.tracker.create_job(JobKind::Maintenance, None).await;

    let backfill = Arc::clone(&state.backfill);
    let id = job_id.clone();
    state.tasks.spawn(job_id.clone(), async move {
        backfill.run(&id).await;
    });

    Json(JobAccepted::new(
        "Album art fetch started",
        job_id,
        JobKind::Maintenance,
        None,
    ))
}

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/process", post(start_processing))
        .route("/playlist-info", get(playlist_info))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/album-art/fetch", post(fetch_album_art))
}
