//! Configuration loading and resolution tests
//!
//! Tests that touch process environment variables are marked #[serial]
//! so they never observe each other's values.

use nona_common::config::{
    load_or_default, load_toml_config, resolve_secret, resolve_setting, write_toml_config,
    LoggingConfig, TomlConfig,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_write_then_load_toml_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("config.toml");

    let config = TomlConfig {
        base_dir: Some(PathBuf::from("/srv/music")),
        port: Some(8080),
        batch_size: Some(4),
        logging: LoggingConfig {
            level: Some("debug".to_string()),
        },
        ..Default::default()
    };

    write_toml_config(&config, &path).unwrap();
    let loaded = load_toml_config(&path).unwrap();

    assert_eq!(loaded, config);
    assert!(!path.with_extension("toml.tmp").exists());
}

#[test]
fn test_invalid_toml_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "port = \"not a number\"").unwrap();

    let err = load_toml_config(&path).unwrap_err();
    assert!(err.to_string().contains("Configuration error"));
}

#[test]
fn test_missing_explicit_file_falls_back_to_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = load_or_default(Some(&temp_dir.path().join("absent.toml")));
    assert_eq!(config, TomlConfig::default());
}

#[test]
#[serial]
fn test_env_overrides_toml() {
    env::set_var("NONA_TEST_BATCH_SIZE", "3");
    let value = resolve_setting(None, "NONA_TEST_BATCH_SIZE", Some(12usize), 10);
    env::remove_var("NONA_TEST_BATCH_SIZE");

    assert_eq!(value, 3);
}

#[test]
#[serial]
fn test_unparsable_env_is_ignored() {
    env::set_var("NONA_TEST_BATCH_SIZE", "lots");
    let value = resolve_setting(None, "NONA_TEST_BATCH_SIZE", Some(12usize), 10);
    env::remove_var("NONA_TEST_BATCH_SIZE");

    assert_eq!(value, 12);
}

#[test]
#[serial]
fn test_blank_secret_counts_as_unset() {
    env::set_var("NONA_TEST_SECRET", "   ");
    let from_toml = "toml-key".to_string();
    let value = resolve_secret("NONA_TEST_SECRET", Some(&from_toml));
    env::remove_var("NONA_TEST_SECRET");

    assert_eq!(value.as_deref(), Some("toml-key"));
    assert_eq!(resolve_secret("NONA_TEST_SECRET", None), None);
}
