//! Configuration File Tests
//!
//! Loads and saves host configuration through real files.
//!
//! Run with: `cargo test -p host --test config_tests`

use common::LogFormat;
use host::config::HostConfig;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("host.toml");

    let mut config = HostConfig::default();
    config.logging.level = "debug".to_string();
    config.scanner.interval = Duration::from_millis(250);
    config.scanner.scan_on_start = false;
    config.transfers.default_timeout = Duration::from_secs(90);
    config.save(&path).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("interval = \"250ms\""));
    assert!(text.contains("default_timeout = \"1m30s\""));

    let loaded = HostConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.logging.level, "debug");
    assert_eq!(loaded.scanner.interval, Duration::from_millis(250));
    assert!(!loaded.scanner.scan_on_start);
    assert_eq!(loaded.transfers.default_timeout, Duration::from_secs(90));
}

#[test]
fn test_partial_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("host.toml");
    fs::write(
        &path,
        r#"
[scanner]
interval = "0"

[logging]
format = "compact"
"#,
    )
    .unwrap();

    let config = HostConfig::load(Some(path)).unwrap();

    assert_eq!(config.scanner.interval, Duration::ZERO);
    assert!(config.scanner.scan_on_start);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, LogFormat::Compact);
    assert_eq!(config.transfers.default_timeout, Duration::from_secs(5));
}

#[test]
fn test_invalid_values_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("host.toml");

    fs::write(&path, "[transfers]\ndefault_timeout = \"0\"\n").unwrap();
    assert!(HostConfig::load(Some(path.clone())).is_err());

    fs::write(&path, "[scanner]\ninterval = \"soon\"\n").unwrap();
    assert!(HostConfig::load(Some(path.clone())).is_err());

    fs::write(&path, "[logging]\nlevel = \"loud\"\n").unwrap();
    assert!(HostConfig::load(Some(path)).is_err());
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = HostConfig::load(Some(dir.path().join("absent.toml"))).unwrap_err();

    assert!(err.to_string().contains("Failed to read config file"));
}
