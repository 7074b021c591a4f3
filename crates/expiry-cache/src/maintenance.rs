//! Cache maintenance operations

use anyhow::{Context, Result};
use expiry_core::{ExpirationPlugin, PluginEnv, QuotaErrorRegistry, SystemClock};
use expiry_db::{TimestampDb, TimestampStore};
use expiry_storage::{CacheStorage, LocalCacheStorage, MatchOptions};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;

/// Every configured cache with its plugin, over one index and one storage
pub struct Maintenance {
    db: TimestampDb,
    storage: Arc<dyn CacheStorage>,
    quota_registry: Arc<QuotaErrorRegistry>,
    plugins: Vec<(String, Arc<ExpirationPlugin>)>,
    config: Config,
}

/// Stored state of a single URL
#[derive(Debug, PartialEq, Eq)]
pub struct UrlReport {
    pub timestamp: Option<i64>,
    pub expired: bool,
}

impl Maintenance {
    /// Open the index and storage described by `config`
    pub async fn open(config: Config) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db_url = format!("sqlite:{}?mode=rwc", config.database.path);
        let db = TimestampDb::new(&db_url)
            .await
            .context("Failed to open timestamp index")?;

        let storage: Arc<dyn CacheStorage> = Arc::new(
            LocalCacheStorage::new(&config.storage.path)
                .await
                .context("Failed to open cache storage")?
                .with_base_url(config.base_url()?),
        );

        Self::with_parts(config, db, storage)
    }

    /// Build from already-open collaborators
    pub fn with_parts(config: Config, db: TimestampDb, storage: Arc<dyn CacheStorage>) -> Result<Self> {
        config.validate()?;
        let base_url = config.base_url()?;
        let quota_registry = Arc::new(QuotaErrorRegistry::new());

        let mut plugins = Vec::with_capacity(config.caches.len());
        for cache in &config.caches {
            let plugin = ExpirationPlugin::new(
                cache.expiration.clone(),
                PluginEnv {
                    db: db.clone(),
                    storage: storage.clone(),
                    clock: Arc::new(SystemClock),
                    runtime_cache_name: config.runtime_cache_name.clone(),
                    base_url: base_url.clone(),
                    quota_registry: Some(quota_registry.clone()),
                },
            )?;
            // Track the cache up front so teardown covers it
            plugin.get_cache_expiration(&cache.name)?;
            plugins.push((cache.name.clone(), plugin));
        }

        info!("Managing {} caches", plugins.len());

        Ok(Self {
            db,
            storage,
            quota_registry,
            plugins,
            config,
        })
    }

    fn plugin(&self, name: &str) -> Result<&Arc<ExpirationPlugin>> {
        self.plugins
            .iter()
            .find(|(cache_name, _)| cache_name == name)
            .map(|(_, plugin)| plugin)
            .ok_or_else(|| anyhow::anyhow!("Cache '{}' is not configured", name))
    }

    /// Sweep one cache, or every configured cache
    pub async fn sweep(&self, only: Option<&str>) -> Result<usize> {
        let mut swept = 0;
        for (name, plugin) in &self.plugins {
            if only.is_some_and(|only| only != name) {
                continue;
            }
            plugin.get_cache_expiration(name)?.expire_entries().await?;
            swept += 1;
        }

        if let Some(only) = only
            && swept == 0
        {
            anyhow::bail!("Cache '{}' is not configured", only);
        }
        Ok(swept)
    }

    /// Delete every configured cache and its metadata
    pub async fn purge(&self) -> Result<()> {
        for (name, plugin) in &self.plugins {
            info!("Purging cache {}", name);
            plugin.delete_cache_and_metadata().await?;
        }
        Ok(())
    }

    /// Behave as if storage quota was exceeded
    ///
    /// Only caches configured with `purge_on_quota_error` are purged.
    pub async fn handle_quota_error(&self) -> Result<()> {
        if self.quota_registry.is_empty() {
            warn!("No cache is configured with purge_on_quota_error");
        }
        self.quota_registry.run_all().await?;
        Ok(())
    }

    /// Report the stored timestamp and expiry of a URL
    pub async fn inspect(&self, cache_name: &str, url: &str) -> Result<UrlReport> {
        let expiration = self.plugin(cache_name)?.get_cache_expiration(cache_name)?;
        let store = TimestampStore::new(self.db.clone(), cache_name, self.config.base_url()?);

        Ok(UrlReport {
            timestamp: store.get_timestamp(url).await?,
            expired: expiration.is_url_expired(url).await?,
        })
    }

    /// Index entry and stored response counts for every known cache
    pub async fn status(&self) -> Result<Vec<(String, i64, usize)>> {
        let mut names = self.db.cache_names().await?;
        for name in self.storage.cache_names().await? {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names.sort();

        let mut rows = Vec::with_capacity(names.len());
        for name in names {
            let indexed = self.db.count_entries(&name).await?;
            let stored = if self.storage.has(&name).await? {
                let cache = self.storage.open(&name).await?;
                cache.keys(None, &MatchOptions::default()).await?.len()
            } else {
                0
            };
            rows.push((name, indexed, stored));
        }
        Ok(rows)
    }
}

/// Spawn a background task that sweeps every cache periodically
pub fn spawn_maintenance_task(
    maintenance: Arc<Maintenance>,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    use tokio::time::{Duration, interval};

    info!(
        "Starting background cache maintenance task (interval: {} seconds)",
        interval_secs
    );

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));

        loop {
            ticker.tick().await;
            info!("Running scheduled cache maintenance");

            if let Err(e) = maintenance.sweep(None).await {
                warn!("Error during scheduled maintenance: {:#}", e);
            }
        }
    })
}
