//! `url_cache` operations
//!
//! Lookups and writes never fail outward: the cache is an optimisation,
//! so internal errors are logged and treated as a miss.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use nona_common::Result;
use sqlx::{QueryBuilder, Row, Sqlite};

use super::{from_json, from_millis, like_pattern, page_offset, to_json, to_millis, ResponseCache};
use crate::models::{
    CacheEntryRow, CacheStats, CleanupReport, Page, PageInfo, TrackMetadata, NO_TIMESTAMP,
};

impl ResponseCache {
    /// Look up cached attributes, refreshing the entry's last access
    pub async fn get(&self, key: &str) -> Option<TrackMetadata> {
        match self.try_get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache lookup failed; treating as miss");
                None
            }
        }
    }

    async fn try_get(&self, key: &str) -> Result<Option<TrackMetadata>> {
        let row = sqlx::query("SELECT id, metadata_json FROM url_cache WHERE url = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.get("id");
        let metadata_json: String = row.get("metadata_json");

        sqlx::query("UPDATE url_cache SET last_accessed = ? WHERE id = ?")
            .bind(to_millis(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;

        let metadata: TrackMetadata = from_json(&metadata_json, "cached metadata")?;
        tracing::debug!(key, "Cache hit");
        Ok(Some(metadata))
    }

    /// Insert or replace the attributes stored for `key`.
    ///
    /// Run-specific fields (duration, album art path) are dropped first.
    pub async fn set(&self, key: &str, metadata: &TrackMetadata) {
        if let Err(e) = self.try_set(key, metadata).await {
            tracing::warn!(key, error = %e, "Cache write failed");
        }
    }

    async fn try_set(&self, key: &str, metadata: &TrackMetadata) -> Result<()> {
        let metadata_json = to_json(&metadata.without_run_fields(), "metadata")?;
        let now = to_millis(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO url_cache (url, metadata_json, created_at, last_accessed)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                metadata_json = excluded.metadata_json,
                last_accessed = excluded.last_accessed
            "#,
        )
        .bind(key)
        .bind(&metadata_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::debug!(key, "Cached metadata");
        Ok(())
    }

    /// Remove one entry. Returns whether an entry existed.
    pub async fn remove(&self, key: &str) -> bool {
        match sqlx::query("DELETE FROM url_cache WHERE url = ?")
            .bind(key)
            .execute(&self.pool)
            .await
        {
            Ok(done) => done.rows_affected() > 0,
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache remove failed");
                false
            }
        }
    }

    /// Delete entries and job rows last accessed more than `days_old` days ago
    pub async fn cleanup(&self, days_old: u32) -> CleanupReport {
        self.cleanup_as_of(days_old, Utc::now()).await
    }

    /// Age-based cleanup relative to an explicit `now`.
    ///
    /// Rows accessed exactly at the cutoff survive.
    pub async fn cleanup_as_of(&self, days_old: u32, now: DateTime<Utc>) -> CleanupReport {
        let cutoff = now
            .checked_sub_signed(ChronoDuration::days(i64::from(days_old)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let cutoff = to_millis(cutoff);

        match self.try_cleanup(cutoff).await {
            Ok(report) => {
                tracing::info!(
                    days_old,
                    entries = report.entries,
                    jobs = report.jobs,
                    "Cache cleanup finished"
                );
                report
            }
            Err(e) => {
                tracing::warn!(days_old, error = %e, "Cache cleanup failed");
                CleanupReport::default()
            }
        }
    }

    async fn try_cleanup(&self, cutoff_millis: i64) -> Result<CleanupReport> {
        let entries = sqlx::query("DELETE FROM url_cache WHERE last_accessed < ?")
            .bind(cutoff_millis)
            .execute(&self.pool)
            .await?
            .rows_affected();

        let jobs = sqlx::query("DELETE FROM jobs_cache WHERE last_accessed < ?")
            .bind(cutoff_millis)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(CleanupReport { entries, jobs })
    }

    /// Entry and job counts; zeros with "N/A" timestamps on failure
    pub async fn stats(&self) -> CacheStats {
        match self.try_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "Cache stats query failed");
                CacheStats::default()
            }
        }
    }

    async fn try_stats(&self) -> Result<CacheStats> {
        let (total_entries, oldest, newest): (i64, Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), MIN(created_at), MAX(created_at) FROM url_cache",
        )
        .fetch_one(&self.pool)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END), 0) AS processing,
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
                COALESCE(SUM(CASE WHEN status = 'stopped' THEN 1 ELSE 0 END), 0) AS stopped
            FROM jobs_cache
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let timestamp = |millis: Option<i64>| {
            millis
                .map(|m| from_millis(m).to_rfc3339())
                .unwrap_or_else(|| NO_TIMESTAMP.to_string())
        };

        Ok(CacheStats {
            total_entries,
            oldest_entry: timestamp(oldest),
            newest_entry: timestamp(newest),
            total_jobs: row.get("total"),
            processing_jobs: row.get("processing"),
            completed_jobs: row.get("completed"),
            failed_jobs: row.get("failed"),
            stopped_jobs: row.get("stopped"),
        })
    }

    /// One page of entries, most recently accessed first.
    ///
    /// `search` filters by substring of the key.
    pub async fn list_entries(
        &self,
        page: u32,
        limit: u32,
        search: Option<&str>,
    ) -> Page<CacheEntryRow> {
        match self.try_list_entries(page, limit, search).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(error = %e, "Cache entry listing failed");
                Page {
                    entries: Vec::new(),
                    pagination: PageInfo::empty(limit),
                }
            }
        }
    }

    async fn try_list_entries(
        &self,
        page: u32,
        limit: u32,
        search: Option<&str>,
    ) -> Result<Page<CacheEntryRow>> {
        let pattern = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM url_cache");
        let mut select = QueryBuilder::<Sqlite>::new(
            "SELECT id, url, created_at, last_accessed FROM url_cache",
        );
        if let Some(pattern) = &pattern {
            count.push(" WHERE url LIKE ").push_bind(pattern.clone()).push(" ESCAPE '\\'");
            select.push(" WHERE url LIKE ").push_bind(pattern.clone()).push(" ESCAPE '\\'");
        }
        select
            .push(" ORDER BY last_accessed DESC, id DESC LIMIT ")
            .push_bind(i64::from(limit))
            .push(" OFFSET ")
            .push_bind(page_offset(page, limit));

        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        let rows = select.build().fetch_all(&self.pool).await?;

        let entries = rows
            .iter()
            .map(|row| CacheEntryRow {
                id: row.get("id"),
                url: row.get("url"),
                created_at: from_millis(row.get("created_at")),
                last_accessed: from_millis(row.get("last_accessed")),
            })
            .collect();

        Ok(Page {
            entries,
            pagination: PageInfo::new(page, limit, total),
        })
    }

    /// Delete entries by row id. Returns the number actually deleted.
    pub async fn delete_entries(&self, ids: &[i64]) -> u64 {
        if ids.is_empty() {
            return 0;
        }

        let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM url_cache WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        match query.build().execute(&self.pool).await {
            Ok(done) => done.rows_affected(),
            Err(e) => {
                tracing::warn!(count = ids.len(), error = %e, "Cache entry deletion failed");
                0
            }
        }
    }
}
