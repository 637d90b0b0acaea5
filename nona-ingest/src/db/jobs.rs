//! `jobs_cache` operations
//!
//! Variable-shape parts of a job (progress, results, errors, maintenance
//! summary) are stored as JSON text columns.

use chrono::Utc;
use nona_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use super::{from_json, from_millis, page_offset, to_json, to_millis, ResponseCache};
use crate::models::{Job, JobEntryRow, JobKind, JobStatus, Page, PageInfo};
use crate::utils::retry::RetryPolicy;

const JOB_COLUMNS: &str = "id, url, type, status, start_time, end_time, progress_json, \
     results_json, errors_json, playlist_title, album_art_results_json";

/// Column values of a job, serialized before touching the database
struct JobRecord {
    id: String,
    url: Option<String>,
    kind: &'static str,
    status: &'static str,
    start_time: i64,
    end_time: Option<i64>,
    progress_json: Option<String>,
    results_json: Option<String>,
    errors_json: Option<String>,
    collection_title: Option<String>,
    summary_json: Option<String>,
}

impl JobRecord {
    fn from_job(job: &Job) -> Result<Self> {
        Ok(Self {
            id: job.id.clone(),
            url: job.url.clone(),
            kind: job.kind.as_str(),
            status: job.status.as_str(),
            start_time: to_millis(job.start_time),
            end_time: job.end_time.map(to_millis),
            progress_json: job.progress.as_ref().map(|p| to_json(p, "progress")).transpose()?,
            results_json: job.results.as_ref().map(|r| to_json(r, "results")).transpose()?,
            errors_json: job.errors.as_ref().map(|e| to_json(e, "errors")).transpose()?,
            collection_title: job.collection_title.clone(),
            summary_json: job.summary.as_ref().map(|s| to_json(s, "summary")).transpose()?,
        })
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let kind: String = row.get("type");
    let status: String = row.get("status");

    let json_column = |column: &str| -> Option<String> { row.get(column) };

    Ok(Job {
        id: row.get("id"),
        kind: kind.parse::<JobKind>().map_err(Error::Internal)?,
        url: row.get("url"),
        status: status.parse::<JobStatus>().map_err(Error::Internal)?,
        start_time: from_millis(row.get("start_time")),
        end_time: row.get::<Option<i64>, _>("end_time").map(from_millis),
        progress: json_column("progress_json")
            .map(|t| from_json(&t, "progress"))
            .transpose()?,
        collection_title: row.get("playlist_title"),
        results: json_column("results_json")
            .map(|t| from_json(&t, "results"))
            .transpose()?,
        errors: json_column("errors_json")
            .map(|t| from_json(&t, "errors"))
            .transpose()?,
        summary: json_column("album_art_results_json")
            .map(|t| from_json(&t, "summary"))
            .transpose()?,
    })
}

impl ResponseCache {
    /// Insert a job row (replacing any row with the same id)
    pub async fn save_job(&self, job: &Job) -> Result<()> {
        let record = JobRecord::from_job(job)?;
        let now = to_millis(Utc::now());

        RetryPolicy::database()
            .run("save_job", || async {
                sqlx::query(
                    r#"
                    INSERT INTO jobs_cache (
                        id, url, type, status, start_time, end_time,
                        progress_json, results_json, errors_json,
                        playlist_title, album_art_results_json,
                        created_at, last_accessed
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        status = excluded.status,
                        end_time = excluded.end_time,
                        progress_json = excluded.progress_json,
                        results_json = excluded.results_json,
                        errors_json = excluded.errors_json,
                        playlist_title = excluded.playlist_title,
                        album_art_results_json = excluded.album_art_results_json,
                        last_accessed = excluded.last_accessed
                    "#,
                )
                .bind(&record.id)
                .bind(&record.url)
                .bind(record.kind)
                .bind(record.status)
                .bind(record.start_time)
                .bind(record.end_time)
                .bind(&record.progress_json)
                .bind(&record.results_json)
                .bind(&record.errors_json)
                .bind(&record.collection_title)
                .bind(&record.summary_json)
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
                Ok::<_, Error>(())
            })
            .await
    }

    /// Rewrite the mutable columns of an existing job row.
    ///
    /// Returns false when no row with the job's id exists.
    pub async fn update_job(&self, job: &Job) -> Result<bool> {
        let record = JobRecord::from_job(job)?;
        let now = to_millis(Utc::now());

        RetryPolicy::database()
            .run("update_job", || async {
                let done = sqlx::query(
                    r#"
                    UPDATE jobs_cache SET
                        status = ?, end_time = ?, progress_json = ?,
                        results_json = ?, errors_json = ?, playlist_title = ?,
                        album_art_results_json = ?, last_accessed = ?
                    WHERE id = ?
                    "#,
                )
                .bind(record.status)
                .bind(record.end_time)
                .bind(&record.progress_json)
                .bind(&record.results_json)
                .bind(&record.errors_json)
                .bind(&record.collection_title)
                .bind(&record.summary_json)
                .bind(now)
                .bind(&record.id)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
                Ok::<_, Error>(done.rows_affected() > 0)
            })
            .await
    }

    pub async fn delete_job(&self, id: &str) -> Result<bool> {
        let done = sqlx::query("DELETE FROM jobs_cache WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Load one job, refreshing its last access
    pub async fn load_job(&self, id: &str) -> Result<Option<Job>> {
        let sql = format!("SELECT {} FROM jobs_cache WHERE id = ?", JOB_COLUMNS);
        let Some(row) = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };

        sqlx::query("UPDATE jobs_cache SET last_accessed = ? WHERE id = ?")
            .bind(to_millis(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;

        job_from_row(&row).map(Some)
    }

    /// All persisted jobs, newest first.
    ///
    /// Rows that fail to decode are skipped with a warning.
    pub async fn load_all_jobs(&self) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {} FROM jobs_cache ORDER BY start_time DESC, id DESC",
            JOB_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let jobs = rows
            .iter()
            .filter_map(|row| match job_from_row(row) {
                Ok(job) => Some(job),
                Err(e) => {
                    let id: String = row.get("id");
                    tracing::warn!(job_id = %id, error = %e, "Skipping undecodable job row");
                    None
                }
            })
            .collect();

        Ok(jobs)
    }

    /// One page of job rows, most recently started first
    pub async fn list_jobs(
        &self,
        page: u32,
        limit: u32,
        status: Option<JobStatus>,
    ) -> Page<JobEntryRow> {
        match self.try_list_jobs(page, limit, status).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(error = %e, "Job listing failed");
                Page {
                    entries: Vec::new(),
                    pagination: PageInfo::empty(limit),
                }
            }
        }
    }

    async fn try_list_jobs(
        &self,
        page: u32,
        limit: u32,
        status: Option<JobStatus>,
    ) -> Result<Page<JobEntryRow>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM jobs_cache");
        let mut select = QueryBuilder::<Sqlite>::new(
            "SELECT id, url, type, status, start_time, end_time, playlist_title, \
             created_at, last_accessed FROM jobs_cache",
        );
        if let Some(status) = status {
            count.push(" WHERE status = ").push_bind(status.as_str());
            select.push(" WHERE status = ").push_bind(status.as_str());
        }
        select
            .push(" ORDER BY start_time DESC, id DESC LIMIT ")
            .push_bind(i64::from(limit))
            .push(" OFFSET ")
            .push_bind(page_offset(page, limit));

        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        let rows = select.build().fetch_all(&self.pool).await?;

        let entries = rows
            .iter()
            .map(|row| JobEntryRow {
                id: row.get("id"),
                url: row.get("url"),
                kind: row.get("type"),
                status: row.get("status"),
                start_time: from_millis(row.get("start_time")),
                end_time: row.get::<Option<i64>, _>("end_time").map(from_millis),
                collection_title: row.get("playlist_title"),
                created_at: from_millis(row.get("created_at")),
                last_accessed: from_millis(row.get("last_accessed")),
            })
            .collect();

        Ok(Page {
            entries,
            pagination: PageInfo::new(page, limit, total),
        })
    }

    /// Delete job rows by id. Returns the number actually deleted.
    pub async fn delete_job_entries(&self, ids: &[String]) -> u64 {
        if ids.is_empty() {
            return 0;
        }

        let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM jobs_cache WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(")");

        match query.build().execute(&self.pool).await {
            Ok(done) => done.rows_affected(),
            Err(e) => {
                tracing::warn!(count = ids.len(), error = %e, "Job row deletion failed");
                0
            }
        }
    }

    /// Move every `processing` row to `stopped`.
    ///
    /// Run once at startup, before the job tracker is hydrated: any job
    /// still `processing` belongs to a previous process.
    pub async fn stop_all_processing_jobs(&self) -> Result<u64> {
        let now = to_millis(Utc::now());
        let done = sqlx::query(
            "UPDATE jobs_cache SET status = ?, end_time = ?, last_accessed = ? WHERE status = ?",
        )
        .bind(JobStatus::Stopped.as_str())
        .bind(now)
        .bind(now)
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;

        let stopped = done.rows_affected();
        if stopped > 0 {
            tracing::info!(stopped, "Marked abandoned processing jobs as stopped");
        }
        Ok(stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArtBackfillSummary, BatchProgress, JobOutcome, TrackMetadata};
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_save_and_load_preserves_payloads() {
        let cache = ResponseCache::in_memory().await.unwrap();
        let mut job = Job::new(JobKind::Collection, Some("https://example.com/playlist?list=x".into()));
        job.progress = Some(BatchProgress::new(3, 0, 0));
        job.collection_title = Some("Mix".to_string());
        cache.save_job(&job).await.unwrap();

        job.progress = Some(BatchProgress::new(3, 2, 1));
        job.complete(JobOutcome::Results {
            results: vec![TrackMetadata::new("A", "B")],
            collection_title: None,
            errors: vec![],
        });
        job.errors = Some(vec!["Failed to process item 3".to_string()]);
        assert!(cache.update_job(&job).await.unwrap());

        let loaded = cache.load_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.progress, Some(BatchProgress::new(3, 2, 1)));
        assert_eq!(loaded.collection_title.as_deref(), Some("Mix"));
        assert_eq!(loaded.results.as_ref().map(Vec::len), Some(1));
        assert_eq!(loaded.errors, job.errors);
        assert_eq!(
            loaded.start_time.timestamp_millis(),
            job.start_time.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_summary_round_trips() {
        let cache = ResponseCache::in_memory().await.unwrap();
        let mut job = Job::new(JobKind::Maintenance, None);
        let summary = ArtBackfillSummary {
            processed: 4,
            fetched: 2,
            existed: 1,
            errors: 1,
        };
        job.complete(JobOutcome::Summary(summary));
        cache.save_job(&job).await.unwrap();

        let loaded = cache.load_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.summary, Some(summary));
        assert_eq!(loaded.url, None);
    }

    #[tokio::test]
    async fn test_update_unknown_job_reports_missing() {
        let cache = ResponseCache::in_memory().await.unwrap();
        let job = Job::new(JobKind::Single, None);
        assert!(!cache.update_job(&job).await.unwrap());
    }

    #[tokio::test]
    async fn test_stop_all_processing_touches_only_processing_rows() {
        let cache = ResponseCache::in_memory().await.unwrap();

        let running = Job::new(JobKind::Single, None);
        let mut done = Job::new(JobKind::Single, None);
        done.complete(JobOutcome::Results {
            results: vec![],
            collection_title: None,
            errors: vec![],
        });
        let mut failed = Job::new(JobKind::Collection, None);
        failed.fail(vec!["boom".into()]);

        for job in [&running, &done, &failed] {
            cache.save_job(job).await.unwrap();
        }

        assert_eq!(cache.stop_all_processing_jobs().await.unwrap(), 1);
        assert_eq!(cache.stop_all_processing_jobs().await.unwrap(), 0);

        let stopped = cache.load_job(&running.id).await.unwrap().unwrap();
        assert_eq!(stopped.status, JobStatus::Stopped);
        assert!(stopped.end_time.is_some());

        let untouched = cache.load_job(&done.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, JobStatus::Completed);
        assert_eq!(untouched.end_time.map(|t| t.timestamp_millis()), done.end_time.map(|t| t.timestamp_millis()));
    }

    #[tokio::test]
    async fn test_load_all_jobs_newest_first() {
        let cache = ResponseCache::in_memory().await.unwrap();
        let mut older = Job::new(JobKind::Single, None);
        older.start_time = older.start_time - ChronoDuration::minutes(5);
        let newer = Job::new(JobKind::Single, None);

        cache.save_job(&older).await.unwrap();
        cache.save_job(&newer).await.unwrap();

        let jobs = cache.load_all_jobs().await.unwrap();
        assert_eq!(jobs[0].id, newer.id);
        assert_eq!(jobs[1].id, older.id);
    }

    #[tokio::test]
    async fn test_list_jobs_filters_by_status_and_bulk_deletes() {
        let cache = ResponseCache::in_memory().await.unwrap();
        let mut failed = Job::new(JobKind::Single, None);
        failed.fail(vec!["x".into()]);
        let running = Job::new(JobKind::Single, None);
        cache.save_job(&failed).await.unwrap();
        cache.save_job(&running).await.unwrap();

        let page = cache.list_jobs(1, 10, Some(JobStatus::Failed)).await;
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.entries[0].id, failed.id);
        assert_eq!(page.entries[0].status, "failed");

        assert_eq!(cache.delete_job_entries(&[]).await, 0);
        let ids = vec![failed.id.clone(), "job_missing".to_string()];
        assert_eq!(cache.delete_job_entries(&ids).await, 1);
        assert_eq!(cache.stats().await.total_jobs, 1);
        assert_eq!(cache.stats().await.processing_jobs, 1);
    }
}
