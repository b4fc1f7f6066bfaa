//! Config loading and defaults integration tests

use std::path::PathBuf;

use preset_catalog::Config;
use tempfile::TempDir;

/// Verify that default Config is constructible and has sensible defaults.
#[test]
fn test_default_config_values() {
    let config = Config::default();

    assert_eq!(config.sync.fetch_timeout_ms, 10_000);
    assert_eq!(config.sync.max_concurrent_fetches, 4);
    assert_eq!(config.sync.max_feed_bytes, 5 * 1024 * 1024);
    assert!(config.catalog.bundled_feed.is_none());
    assert!(config.catalog.default_subscription_url.is_some());
    assert!(!config.migration.auto_run);
}

#[test]
fn test_config_with_all_fields() {
    let toml_str = r#"
[catalog]
data_dir = "/var/lib/presets"
bundled_feed = "/usr/share/presets/presets.json"
default_subscription_url = "https://cdn.example/presets.json"
default_subscription_name = "Studio presets"

[sync]
fetch_timeout_ms = 2500
max_concurrent_fetches = 2
max_feed_bytes = 1048576

[migration]
auto_run = true
"#;

    let config = Config::from_toml(toml_str).expect("valid TOML");

    assert_eq!(config.catalog.data_dir, PathBuf::from("/var/lib/presets"));
    assert_eq!(
        config.catalog.bundled_feed,
        Some(PathBuf::from("/usr/share/presets/presets.json"))
    );
    assert_eq!(
        config.catalog.default_subscription_url.as_deref(),
        Some("https://cdn.example/presets.json")
    );
    assert_eq!(config.catalog.default_subscription_name, "Studio presets");
    assert_eq!(config.sync.fetch_timeout_ms, 2500);
    assert_eq!(config.sync.max_concurrent_fetches, 2);
    assert_eq!(config.sync.max_feed_bytes, 1_048_576);
    assert!(config.migration.auto_run);
}

#[test]
fn test_partial_sections_fill_defaults() {
    let toml_str = r#"
[sync]
fetch_timeout_ms = 500
"#;

    let config = Config::from_toml(toml_str).unwrap();
    assert_eq!(config.sync.fetch_timeout_ms, 500);
    assert_eq!(config.sync.max_concurrent_fetches, 4);
    assert_eq!(config.catalog.data_dir, PathBuf::from("./preset-data"));
}

#[test]
fn test_load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("preset-catalog.toml");
    std::fs::write(&path, "[catalog]\ndata_dir = \"/tmp/presets\"\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.catalog.data_dir, PathBuf::from("/tmp/presets"));

    let missing = Config::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(missing.catalog.data_dir, PathBuf::from("./preset-data"));
}

#[test]
fn test_invalid_values_are_rejected() {
    assert!(Config::from_toml("[sync]\nmax_concurrent_fetches = \"many\"\n").is_err());
    assert!(Config::from_toml("not toml at all = = =").is_err());
}

#[test]
fn test_config_roundtrips_through_toml() {
    let config = Config::default();
    let serialized = toml::to_string(&config).unwrap();
    let parsed = Config::from_toml(&serialized).unwrap();
    assert_eq!(parsed.catalog.data_dir, config.catalog.data_dir);
    assert_eq!(parsed.sync.max_feed_bytes, config.sync.max_feed_bytes);
}
