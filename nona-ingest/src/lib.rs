//! nona-ingest library interface
//!
//! Exposes the service components and router for the binary and for
//! integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::db::ResponseCache;
use crate::services::{BatchOrchestrator, CoverArtBackfill, JobTracker, ProcessingPipeline, TaskRegistry};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub cache: ResponseCache,
    pub tracker: Arc<JobTracker>,
    /// Running job futures
    pub tasks: TaskRegistry,
    pub pipeline: Arc<ProcessingPipeline>,
    pub orchestrator: Arc<BatchOrchestrator>,
    pub backfill: Arc<CoverArtBackfill>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        cache: ResponseCache,
        tracker: Arc<JobTracker>,
        pipeline: Arc<ProcessingPipeline>,
        batch_size: usize,
    ) -> Self {
        let orchestrator = BatchOrchestrator::new(Arc::clone(&pipeline), Arc::clone(&tracker), batch_size);
        let backfill = CoverArtBackfill::new(
            pipeline.library().clone(),
            Arc::clone(&pipeline.collaborators().tagger),
            pipeline.cover_art().clone(),
            Arc::clone(&tracker),
        );

        Self {
            cache,
            tasks: TaskRegistry::new(Arc::clone(&tracker)),
            tracker,
            pipeline,
            orchestrator: Arc::new(orchestrator),
            backfill: Arc::new(backfill),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
///
/// The library directory is served read-only under `/music`.
pub fn build_router(state: AppState) -> Router {
    let music = ServeDir::new(state.pipeline.library().base_dir());

    Router::new()
        .merge(api::job_routes())
        .merge(api::cache_routes())
        .merge(api::file_routes())
        .merge(api::health_routes())
        .nest_service("/music", music)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
