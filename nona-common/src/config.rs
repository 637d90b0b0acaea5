//! Configuration file loading and setting resolution
//!
//! Settings resolve in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable pointing at an explicit config file
pub const CONFIG_PATH_ENV: &str = "NONA_CONFIG";

/// Logging section of the TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter directive, e.g. "info" or "nona_ingest=debug"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// On-disk configuration. Every field is optional; missing fields fall
/// through to environment variables and compiled defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Library root where tagged files are placed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,

    /// Directory holding the SQLite cache database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// API key for the enrichment model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,

    /// Optional Discogs token, enables the Discogs cover art fallback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discogs_api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    /// Collection members processed concurrently per batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// In-memory job capacity before the oldest jobs are evicted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_jobs: Option<usize>,

    /// Minimum spacing between cover art lookups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_art_interval_ms: Option<u64>,

    /// Hard deadline for a single enrichment call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrich_timeout_secs: Option<u64>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Locate the config file.
///
/// Explicit path wins, then `NONA_CONFIG`, then the per-user config
/// directory. Returns `None` when no file exists; a missing config is not
/// an error.
pub fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("nona").join("config.toml"))
        .filter(|p| p.exists())
}

/// Load a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load the config file if one can be located, falling back to defaults.
///
/// A file that exists but fails to parse is reported and ignored so that a
/// broken config never prevents startup.
pub fn load_or_default(explicit: Option<&Path>) -> TomlConfig {
    match locate_config_file(explicit) {
        Some(path) if path.exists() => match load_toml_config(&path) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("{}; using defaults", e);
                TomlConfig::default()
            }
        },
        Some(path) => {
            tracing::warn!("Config file {} not found; using defaults", path.display());
            TomlConfig::default()
        }
        None => TomlConfig::default(),
    }
}

/// Write a TOML config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Resolve one setting: CLI → ENV → TOML → default.
///
/// Environment values that fail to parse are ignored with a warning.
pub fn resolve_setting<T>(cli: Option<T>, env_var: &str, toml: Option<T>, default: T) -> T
where
    T: FromStr,
{
    if let Some(value) = cli {
        return value;
    }

    if let Ok(raw) = std::env::var(env_var) {
        let raw = raw.trim();
        if !raw.is_empty() {
            match raw.parse::<T>() {
                Ok(value) => return value,
                Err(_) => tracing::warn!(env_var, value = raw, "Ignoring unparsable environment value"),
            }
        }
    }

    toml.unwrap_or(default)
}

/// Resolve an optional secret: ENV → TOML. Blank values count as unset.
pub fn resolve_secret(env_var: &str, toml: Option<&String>) -> Option<String> {
    std::env::var(env_var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| toml.filter(|v| !v.trim().is_empty()).cloned())
}
