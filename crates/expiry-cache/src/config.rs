//! Configuration loading and management

use anyhow::{Context, Result};
use expiry_core::ExpirationConfig;
use expiry_db::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name of the pipeline's shared default cache; never managed
    #[serde(default = "default_runtime_cache_name")]
    pub runtime_cache_name: String,
    /// Base for resolving relative request URLs
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Managed caches and their expiration limits
    #[serde(default)]
    pub caches: Vec<CacheConfig>,
}

/// A managed cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub name: String,
    #[serde(flatten)]
    pub expiration: ExpirationConfig,
}

/// Content storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

/// Timestamp index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Periodic sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

/// Prometheus exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_bind")]
    pub bind: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_metrics_bind(),
        }
    }
}

// Default value functions
fn default_runtime_cache_name() -> String {
    "runtime-default".to_string()
}

fn default_base_url() -> String {
    "http://localhost/".to_string()
}

fn default_storage_path() -> String {
    "./data/caches".to_string()
}

fn default_db_path() -> String {
    "./data/expiration.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_interval_secs() -> u64 {
    300
}

fn default_metrics_bind() -> String {
    "127.0.0.1:9464".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime_cache_name: default_runtime_cache_name(),
            base_url: default_base_url(),
            storage: StorageConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            maintenance: MaintenanceConfig::default(),
            metrics: MetricsConfig::default(),
            caches: vec![],
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        // Check if config file exists
        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Check cache definitions and the base URL
    pub fn validate(&self) -> Result<()> {
        self.base_url()?;

        let mut seen = HashSet::new();
        for cache in &self.caches {
            if cache.name.is_empty() {
                anyhow::bail!("Cache name must not be empty");
            }
            if cache.name == self.runtime_cache_name {
                anyhow::bail!(
                    "Cache '{}' is the runtime cache and cannot have an expiration policy",
                    cache.name
                );
            }
            if !seen.insert(cache.name.as_str()) {
                anyhow::bail!("Cache '{}' is configured more than once", cache.name);
            }
            cache
                .expiration
                .check_limits()
                .with_context(|| format!("Invalid expiration settings for cache '{}'", cache.name))?;
        }
        Ok(())
    }

    /// The parsed base URL
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.base_url).with_context(|| format!("Invalid base_url: {}", self.base_url))
    }
}
