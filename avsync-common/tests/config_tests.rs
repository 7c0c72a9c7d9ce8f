//! Config file resolution and graceful degradation
//!
//! Tests that manipulate AVSYNC_CONFIG are marked with #[serial] so they
//! never observe each other's environment.

use avsync_common::config::{load_or_default, resolve_config_path, LoggingConfig, TomlConfig};
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::Path;

const TEST_ENV: &str = "AVSYNC_CONFIG_TEST";

#[test]
#[serial]
fn test_cli_argument_wins_over_env() {
    env::set_var(TEST_ENV, "/from/env.toml");
    let resolved = resolve_config_path(Some(Path::new("/from/cli.toml")), TEST_ENV);
    assert_eq!(resolved.unwrap(), Path::new("/from/cli.toml"));
    env::remove_var(TEST_ENV);
}

#[test]
#[serial]
fn test_env_var_used_without_cli() {
    env::set_var(TEST_ENV, "/from/env.toml");
    let resolved = resolve_config_path(None, TEST_ENV);
    assert_eq!(resolved.unwrap(), Path::new("/from/env.toml"));
    env::remove_var(TEST_ENV);
}

#[test]
#[serial]
fn test_missing_file_degrades_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    let config = load_or_default(Some(&missing), TEST_ENV);
    assert_eq!(config.logging, LoggingConfig::default());
    assert!(config.player.is_empty());
}

#[test]
#[serial]
fn test_malformed_file_degrades_to_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[player\nspeed = ").unwrap();

    let config = load_or_default(Some(file.path()), TEST_ENV);
    assert!(config.player.is_empty());
}

#[test]
#[serial]
fn test_valid_file_is_loaded() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[logging]\nlevel = \"debug\"\n\n[player]\nspeed = 1.5").unwrap();

    let config = load_or_default(Some(file.path()), TEST_ENV);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(
        config.player.get("speed").and_then(|v| v.as_float()),
        Some(1.5)
    );
}

#[test]
fn test_from_file_reports_io_error() {
    let result = TomlConfig::from_file(Path::new("/definitely/not/here.toml"));
    assert!(matches!(result, Err(avsync_common::Error::Io(_))));
}
