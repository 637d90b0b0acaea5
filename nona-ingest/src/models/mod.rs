//! Data models for nona-ingest
//!
//! - Job lifecycle records and outcomes
//! - Enrichment attributes
//! - Cache browsing rows and pagination

pub mod cache;
pub mod job;
pub mod metadata;

pub use cache::{CacheEntryRow, CacheStats, CleanupReport, JobEntryRow, Page, PageInfo, NO_TIMESTAMP};
pub use job::{ArtBackfillSummary, BatchProgress, Job, JobKind, JobOutcome, JobStatus};
pub use metadata::{TrackMetadata, UNKNOWN_ALBUM};
