//! HTTP API handlers for nona-ingest

pub mod cache;
pub mod files;
pub mod health;
pub mod jobs;

pub use cache::cache_routes;
pub use files::file_routes;
pub use health::health_routes;
pub use jobs::job_routes;
