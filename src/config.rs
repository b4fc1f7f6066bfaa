//! Catalog configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl Config {
    /// Load from a TOML file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Root for the database, the feed cache and the legacy artifact
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Bundled feed override (the embedded bundle is used when unset)
    #[serde(default)]
    pub bundled_feed: Option<PathBuf>,

    /// Remote counterpart of the bundled feed, seeded on first launch
    #[serde(default = "default_subscription_url")]
    pub default_subscription_url: Option<String>,

    #[serde(default = "default_subscription_name")]
    pub default_subscription_name: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            bundled_feed: None,
            default_subscription_url: default_subscription_url(),
            default_subscription_name: default_subscription_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Per-fetch timeout in milliseconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,

    /// Fetches running at once during a refresh
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_fetches: usize,

    /// Feeds larger than this are rejected
    #[serde(default = "default_max_feed_bytes")]
    pub max_feed_bytes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: default_fetch_timeout(),
            max_concurrent_fetches: default_max_concurrent(),
            max_feed_bytes: default_max_feed_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Run pending migrations at startup instead of only exposing the legacy flag
    #[serde(default)]
    pub auto_run: bool,
}

// Defaults
fn default_data_dir() -> PathBuf { PathBuf::from("./preset-data") }
fn default_subscription_url() -> Option<String> {
    Some("https://presets.example.com/v2/presets.json".to_string())
}
fn default_subscription_name() -> String { "Official presets".to_string() }
fn default_fetch_timeout() -> u64 { 10_000 }
fn default_max_concurrent() -> usize { 4 }
fn default_max_feed_bytes() -> usize { 5 * 1024 * 1024 } // 5MB
