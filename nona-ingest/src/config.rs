//! Configuration resolution for nona-ingest
//!
//! Each setting resolves CLI → ENV → TOML → compiled default. API keys are
//! only read from ENV and TOML.

use nona_common::config::{resolve_secret, resolve_setting, TomlConfig};
use nona_common::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_BASE_DIR: &str = "./music";
pub const DEFAULT_CACHE_DIR: &str = "./cache";
pub const CACHE_DB_FILE: &str = "cache.sqlite";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_MAX_JOBS: usize = 100;
pub const DEFAULT_COVER_ART_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_ENRICH_TIMEOUT_SECS: u64 = 30;

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub base_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub batch_size: Option<usize>,
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub base_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub gemini_api_key: Option<String>,
    pub discogs_api_key: Option<String>,
    pub model_name: String,
    pub batch_size: usize,
    pub max_jobs: usize,
    pub cover_art_interval: Duration,
    pub enrich_timeout: Duration,
    /// Filter directive from `[logging] level`
    pub log_level: Option<String>,
}

impl IngestConfig {
    /// Resolve all settings and validate them
    pub fn resolve(cli: CliOverrides, toml: &TomlConfig) -> Result<Self> {
        let config = Self {
            base_dir: resolve_setting(
                cli.base_dir,
                "BASE_DIR",
                toml.base_dir.clone(),
                PathBuf::from(DEFAULT_BASE_DIR),
            ),
            cache_dir: resolve_setting(
                cli.cache_dir,
                "CACHE_DIR",
                toml.cache_dir.clone(),
                PathBuf::from(DEFAULT_CACHE_DIR),
            ),
            host: resolve_setting(cli.host, "HOST", toml.host.clone(), DEFAULT_HOST.to_string()),
            port: resolve_setting(cli.port, "PORT", toml.port, DEFAULT_PORT),
            gemini_api_key: resolve_secret("GEMINI_API_KEY", toml.gemini_api_key.as_ref()),
            discogs_api_key: resolve_secret("DISCOGS_API_KEY", toml.discogs_api_key.as_ref()),
            model_name: resolve_setting(
                None,
                "GEMINI_MODEL",
                toml.model_name.clone(),
                DEFAULT_MODEL.to_string(),
            ),
            batch_size: resolve_setting(
                cli.batch_size,
                "BATCH_SIZE",
                toml.batch_size,
                DEFAULT_BATCH_SIZE,
            ),
            max_jobs: resolve_setting(None, "MAX_JOBS", toml.max_jobs, DEFAULT_MAX_JOBS),
            cover_art_interval: Duration::from_millis(resolve_setting(
                None,
                "COVER_ART_INTERVAL_MS",
                toml.cover_art_interval_ms,
                DEFAULT_COVER_ART_INTERVAL_MS,
            )),
            enrich_timeout: Duration::from_secs(resolve_setting(
                None,
                "ENRICH_TIMEOUT_SECS",
                toml.enrich_timeout_secs,
                DEFAULT_ENRICH_TIMEOUT_SECS,
            )),
            log_level: toml.logging.level.clone(),
        };

        config.validate()?;
        config.log_summary();
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.max_jobs == 0 {
            return Err(Error::Config("max_jobs must be at least 1".to_string()));
        }
        if self.enrich_timeout.is_zero() {
            return Err(Error::Config("enrich_timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }

    fn log_summary(&self) {
        if self.gemini_api_key.is_none() {
            warn!("GEMINI_API_KEY not configured; new items cannot be enriched");
        }
        if self.discogs_api_key.is_some() {
            info!("Discogs cover art fallback enabled");
        }
    }

    /// Path of the SQLite cache database
    pub fn cache_db_path(&self) -> PathBuf {
        self.cache_dir.join(CACHE_DB_FILE)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
