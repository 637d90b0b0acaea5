//! SQLite-backed response cache and durable job table
//!
//! One database file holds two tables:
//! - `url_cache`: normalized source reference → enrichment attributes
//! - `jobs_cache`: lifecycle record of every tracked job
//!
//! Timestamps are stored as unix milliseconds so range comparisons are
//! plain integer comparisons.

mod entries;
mod jobs;

use chrono::{DateTime, Utc};
use nona_common::Result;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Persisted key/value cache plus job storage.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct ResponseCache {
    pool: SqlitePool,
}

impl ResponseCache {
    /// Open (creating if needed) the cache database at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = init_database_pool(db_path).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database, used by tests and throwaway runs.
    ///
    /// Pinned to a single long-lived connection since every SQLite memory
    /// connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        init_tables(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!("Connecting to database: {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create tables and indexes if they don't exist
async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS url_cache (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL UNIQUE,
            metadata_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_accessed INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs_cache (
            id TEXT PRIMARY KEY,
            url TEXT,
            type TEXT NOT NULL,
            status TEXT NOT NULL,
            start_time INTEGER NOT NULL,
            end_time INTEGER,
            progress_json TEXT,
            results_json TEXT,
            errors_json TEXT,
            playlist_title TEXT,
            album_art_results_json TEXT,
            created_at INTEGER NOT NULL,
            last_accessed INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_url_cache_url ON url_cache(url)",
        "CREATE INDEX IF NOT EXISTS idx_url_cache_last_accessed ON url_cache(last_accessed)",
        "CREATE INDEX IF NOT EXISTS idx_jobs_cache_status ON jobs_cache(status)",
        "CREATE INDEX IF NOT EXISTS idx_jobs_cache_start_time ON jobs_cache(start_time)",
        "CREATE INDEX IF NOT EXISTS idx_jobs_cache_last_accessed ON jobs_cache(last_accessed)",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Database tables initialized (url_cache, jobs_cache)");

    Ok(())
}

fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn to_json<T: Serialize + ?Sized>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| nona_common::Error::Internal(format!("Failed to serialize {}: {}", what, e)))
}

fn from_json<T: DeserializeOwned>(text: &str, what: &str) -> Result<T> {
    serde_json::from_str(text)
        .map_err(|e| nona_common::Error::Internal(format!("Failed to deserialize {}: {}", what, e)))
}

/// `%term%` pattern for LIKE with wildcards in `term` escaped
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Row offset of a 1-based page
fn page_offset(page: u32, limit: u32) -> i64 {
    i64::from(page.saturating_sub(1)) * i64::from(limit)
}
