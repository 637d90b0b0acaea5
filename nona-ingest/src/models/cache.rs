//! Response cache browsing types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder timestamp text when the cache is empty or unreadable
pub const NO_TIMESTAMP: &str = "N/A";

/// Aggregate counts over the cache and job tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_entries: i64,
    pub oldest_entry: String,
    pub newest_entry: String,
    pub total_jobs: i64,
    pub processing_jobs: i64,
    pub completed_jobs: i64,
    pub failed_jobs: i64,
    pub stopped_jobs: i64,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self {
            total_entries: 0,
            oldest_entry: NO_TIMESTAMP.to_string(),
            newest_entry: NO_TIMESTAMP.to_string(),
            total_jobs: 0,
            processing_jobs: 0,
            completed_jobs: 0,
            failed_jobs: 0,
            stopped_jobs: 0,
        }
    }
}

/// One cached response, without its payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntryRow {
    pub id: i64,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

/// One persisted job, without its variable-shape payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEntryRow {
    pub id: String,
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub collection_title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

/// Pagination block returned alongside a page of rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageInfo {
    /// Compute pagination for a 1-based page
    pub fn new(page: u32, limit: u32, total: i64) -> Self {
        let limit_i = i64::from(limit.max(1));
        Self {
            page,
            limit,
            total,
            total_pages: (total + limit_i - 1) / limit_i,
            has_next: i64::from(page) * limit_i < total,
            has_prev: page > 1,
        }
    }

    /// Pagination for an empty result
    pub fn empty(limit: u32) -> Self {
        Self::new(1, limit, 0)
    }
}

/// A page of rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub entries: Vec<T>,
    pub pagination: PageInfo,
}

/// Rows removed by an age-based cleanup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub entries: u64,
    pub jobs: u64,
}
