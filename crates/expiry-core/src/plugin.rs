//! Request pipeline plugin surface

use async_trait::async_trait;
use expiry_db::{TimestampDb, TimestampStore, Url};
use expiry_storage::{CacheStorage, CachedResponse};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ExpirationConfig;
use crate::error::CoreError;
use crate::expiration::CacheExpiration;
use crate::quota::QuotaErrorRegistry;
use crate::task::{observed, spawn_detached};

/// Hooks a request pipeline calls around cache reads and writes
///
/// The defaults pass everything through unchanged.
#[async_trait]
pub trait CachePlugin: Send + Sync {
    /// Called before a cached response is returned; `None` means cache miss
    async fn cached_response_will_be_used(
        &self,
        _cache_name: &str,
        _request_url: &str,
        cached_response: Option<CachedResponse>,
        _event: Option<&dyn ExtendableEvent>,
    ) -> Result<Option<CachedResponse>, CoreError> {
        Ok(cached_response)
    }

    /// Called after a response has been written to a cache
    async fn cache_did_update(&self, _cache_name: &str, _request_url: &str) -> Result<(), CoreError> {
        Ok(())
    }
}

/// A host handle that keeps the process alive until background work ends
pub trait ExtendableEvent: Send + Sync {
    fn wait_until(&self, task: BoxFuture<'static, ()>);
}

impl ExtendableEvent for TaskTracker {
    fn wait_until(&self, task: BoxFuture<'static, ()>) {
        self.spawn(task);
    }
}

/// Collaborators shared by every cache an [`ExpirationPlugin`] manages
#[derive(Clone)]
pub struct PluginEnv {
    pub db: TimestampDb,
    pub storage: Arc<dyn CacheStorage>,
    pub clock: Arc<dyn Clock>,
    /// The pipeline's shared default cache, which may not be managed
    pub runtime_cache_name: String,
    /// Base for resolving relative request URLs
    pub base_url: Url,
    pub quota_registry: Option<Arc<QuotaErrorRegistry>>,
}

/// Expiration plugin for named caches
///
/// Creates one [`CacheExpiration`] per cache name on first use and applies
/// the same limits to all of them.
pub struct ExpirationPlugin {
    config: ExpirationConfig,
    db: TimestampDb,
    storage: Arc<dyn CacheStorage>,
    clock: Arc<dyn Clock>,
    runtime_cache_name: String,
    base_url: Url,
    cache_expirations: Mutex<HashMap<String, Arc<CacheExpiration>>>,
}

impl ExpirationPlugin {
    /// Create a new plugin
    ///
    /// With `purge_on_quota_error` set and a registry available,
    /// [`Self::delete_cache_and_metadata`] is registered as a quota-error
    /// callback.
    pub fn new(config: ExpirationConfig, env: PluginEnv) -> Result<Arc<Self>, CoreError> {
        config.validate()?;

        info!(
            "Initializing expiration plugin (max_entries: {:?}, max_age_seconds: {:?}, purge_on_quota_error: {})",
            config.max_entries(),
            config.max_age_seconds,
            config.purge_on_quota_error
        );

        let purge_registry = if config.purge_on_quota_error {
            if env.quota_registry.is_none() {
                warn!("purge_on_quota_error is set but no quota registry was provided");
            }
            env.quota_registry.clone()
        } else {
            None
        };

        Ok(Arc::new_cyclic(|weak: &Weak<Self>| {
            if let Some(registry) = purge_registry {
                let weak = weak.clone();
                registry.register_callback(move || {
                    let weak = weak.clone();
                    async move {
                        match weak.upgrade() {
                            Some(plugin) => {
                                metrics::counter!("expiry_quota_purges_total").increment(1);
                                plugin.delete_cache_and_metadata().await
                            }
                            None => Ok(()),
                        }
                    }
                });
            }

            Self {
                config,
                db: env.db,
                storage: env.storage,
                clock: env.clock,
                runtime_cache_name: env.runtime_cache_name,
                base_url: env.base_url,
                cache_expirations: Mutex::new(HashMap::new()),
            }
        }))
    }

    /// Get or create the coordinator for `cache_name`
    ///
    /// Fails with [`CoreError::InvalidConfiguration`] for the pipeline's
    /// default runtime cache.
    pub fn get_cache_expiration(&self, cache_name: &str) -> Result<Arc<CacheExpiration>, CoreError> {
        if cache_name == self.runtime_cache_name {
            return Err(CoreError::InvalidConfiguration(format!(
                "expiration can only be used with named caches, not the default runtime cache {}",
                cache_name
            )));
        }

        let mut expirations = self.cache_expirations.lock();
        if let Some(expiration) = expirations.get(cache_name) {
            return Ok(expiration.clone());
        }

        let store = TimestampStore::new(self.db.clone(), cache_name, self.base_url.clone());
        let expiration = Arc::new(CacheExpiration::new(
            cache_name,
            self.config.clone(),
            store,
            self.storage.clone(),
            self.clock.clone(),
        ));
        expirations.insert(cache_name.to_string(), expiration.clone());
        Ok(expiration)
    }

    /// Names of the caches this plugin currently manages
    pub fn tracked_cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cache_expirations.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Delete every managed cache along with its expiration metadata
    ///
    /// Caches are torn down one at a time; the first failure stops the
    /// teardown. Afterwards the plugin tracks no caches.
    pub async fn delete_cache_and_metadata(&self) -> Result<(), CoreError> {
        let mut tracked: Vec<(String, Arc<CacheExpiration>)> = self
            .cache_expirations
            .lock()
            .iter()
            .map(|(name, expiration)| (name.clone(), expiration.clone()))
            .collect();
        tracked.sort_by(|a, b| a.0.cmp(&b.0));

        for (cache_name, expiration) in tracked {
            info!("Deleting cache and expiration metadata for {}", cache_name);
            self.storage.delete(&cache_name).await?;
            expiration.delete_all().await?;
        }

        self.cache_expirations.lock().clear();
        Ok(())
    }

    /// Cheap freshness check from the response's `Date` header
    ///
    /// A missing or unparsable header counts as fresh.
    fn is_response_date_fresh(&self, response: &CachedResponse) -> bool {
        let Some(max_age) = self.config.max_age_millis() else {
            return true;
        };
        let Some(date) = response.date() else {
            return true;
        };
        date.saturating_add(max_age) >= self.clock.now_millis()
    }
}

#[async_trait]
impl CachePlugin for ExpirationPlugin {
    /// Returns the response only if its `Date` header is recent enough.
    ///
    /// A sweep and a timestamp update for `request_url` are started in the
    /// background either way, so an expired entry can still be served once
    /// before the sweep removes it.
    async fn cached_response_will_be_used(
        &self,
        cache_name: &str,
        request_url: &str,
        cached_response: Option<CachedResponse>,
        event: Option<&dyn ExtendableEvent>,
    ) -> Result<Option<CachedResponse>, CoreError> {
        let Some(response) = cached_response else {
            return Ok(None);
        };

        let is_fresh = self.is_response_date_fresh(&response);
        let expiration = self.get_cache_expiration(cache_name)?;

        spawn_detached(cache_name, "sweep", expiration.expire_entries());

        let url = request_url.to_string();
        let update = observed(cache_name, "timestamp update", async move {
            expiration.update_timestamp(&url).await
        });
        match event {
            Some(event) => event.wait_until(Box::pin(update)),
            None => {
                tokio::spawn(update);
            }
        }

        if is_fresh {
            Ok(Some(response))
        } else {
            debug!("Cached response for {} in {} is stale", request_url, cache_name);
            metrics::counter!("expiry_stale_responses_total", "cache" => cache_name.to_string())
                .increment(1);
            Ok(None)
        }
    }

    /// Records the write, then waits for a sweep of the cache.
    async fn cache_did_update(&self, cache_name: &str, request_url: &str) -> Result<(), CoreError> {
        let expiration = self.get_cache_expiration(cache_name)?;
        expiration.update_timestamp(request_url).await?;
        expiration.expire_entries().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use bytes::Bytes;
    use expiry_storage::{MatchOptions, MemoryCacheStorage};
    use http::{HeaderMap, HeaderValue, StatusCode, header};
    use std::time::Duration;

    const RUNTIME: &str = "runtime-default";

    struct Fixture {
        db: TimestampDb,
        clock: Arc<ManualClock>,
        storage: Arc<MemoryCacheStorage>,
        registry: Arc<QuotaErrorRegistry>,
        plugin: Arc<ExpirationPlugin>,
    }

    async fn fixture(config: ExpirationConfig) -> Fixture {
        let db = TimestampDb::in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(1_000_000));
        let base_url = Url::parse("https://example.com/").unwrap();
        let storage = Arc::new(MemoryCacheStorage::new().with_base_url(base_url.clone()));
        let registry = Arc::new(QuotaErrorRegistry::new());
        let plugin = ExpirationPlugin::new(
            config,
            PluginEnv {
                db: db.clone(),
                storage: storage.clone(),
                clock: clock.clone(),
                runtime_cache_name: RUNTIME.to_string(),
                base_url,
                quota_registry: Some(registry.clone()),
            },
        )
        .unwrap();
        Fixture {
            db,
            clock,
            storage,
            registry,
            plugin,
        }
    }

    fn response_dated(date: Option<&str>) -> CachedResponse {
        let mut headers = HeaderMap::new();
        if let Some(date) = date {
            headers.insert(header::DATE, HeaderValue::from_str(date).unwrap());
        }
        CachedResponse::new(StatusCode::OK, headers, Bytes::from_static(b"hi"))
    }

    fn max_age(seconds: u64) -> ExpirationConfig {
        ExpirationConfig {
            max_age_seconds: Some(seconds),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_runtime_cache_is_rejected() {
        let f = fixture(max_age(60)).await;
        let result = f.plugin.get_cache_expiration(RUNTIME);
        assert!(matches!(result, Err(CoreError::InvalidConfiguration(_))));
        assert!(f.plugin.tracked_cache_names().is_empty());

        let result = f.plugin.cache_did_update(RUNTIME, "/a").await;
        assert!(matches!(result, Err(CoreError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_coordinators_are_created_once_per_name() {
        let f = fixture(max_age(60)).await;
        let first = f.plugin.get_cache_expiration("images").unwrap();
        let again = f.plugin.get_cache_expiration("images").unwrap();
        f.plugin.get_cache_expiration("scripts").unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(f.plugin.tracked_cache_names(), vec!["images", "scripts"]);
    }

    #[tokio::test]
    async fn test_unlimited_plugin_creates_coordinators() {
        let f = fixture(ExpirationConfig::default()).await;
        for name in ["a", "b", "c"] {
            let expiration = f.plugin.get_cache_expiration(name).unwrap();
            expiration.expire_entries().await.unwrap();
        }
        assert_eq!(f.plugin.tracked_cache_names(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_missing_response_is_passed_through() {
        let f = fixture(max_age(60)).await;
        let result = f
            .plugin
            .cached_response_will_be_used("images", "/a", None, None)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(f.plugin.tracked_cache_names().is_empty());
    }

    #[tokio::test]
    async fn test_date_header_freshness() {
        let f = fixture(max_age(60)).await;
        // 1970-01-01T00:16:40Z == 1_000_000 ms
        f.clock.set(1_000_000 + 60_000);

        let fresh = response_dated(Some("Thu, 01 Jan 1970 00:16:40 GMT"));
        let result = f
            .plugin
            .cached_response_will_be_used("images", "/a", Some(fresh), None)
            .await
            .unwrap();
        assert!(result.is_some());

        f.clock.advance(1);
        let stale = response_dated(Some("Thu, 01 Jan 1970 00:16:40 GMT"));
        let result = f
            .plugin
            .cached_response_will_be_used("images", "/a", Some(stale), None)
            .await
            .unwrap();
        assert!(result.is_none());

        for date in [None, Some("not a date")] {
            let result = f
                .plugin
                .cached_response_will_be_used("images", "/a", Some(response_dated(date)), None)
                .await
                .unwrap();
            assert!(result.is_some());
        }
    }

    #[tokio::test]
    async fn test_without_max_age_everything_is_fresh() {
        let f = fixture(ExpirationConfig {
            max_entries: Some(5),
            ..Default::default()
        })
        .await;
        let old = response_dated(Some("Thu, 01 Jan 1970 00:00:00 GMT"));
        let result = f
            .plugin
            .cached_response_will_be_used("images", "/a", Some(old), None)
            .await
            .unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn test_read_records_timestamp_through_event() {
        let f = fixture(max_age(60)).await;
        let tracker = TaskTracker::new();

        f.plugin
            .cached_response_will_be_used(
                "images",
                "/a#ignored",
                Some(response_dated(None)),
                Some(&tracker),
            )
            .await
            .unwrap();

        tracker.close();
        tokio::time::timeout(Duration::from_secs(5), tracker.wait())
            .await
            .unwrap();

        let store = TimestampStore::new(
            f.db.clone(),
            "images",
            Url::parse("https://example.com/").unwrap(),
        );
        assert_eq!(store.get_timestamp("/a").await.unwrap(), Some(1_000_000));
    }

    #[tokio::test]
    async fn test_cache_did_update_evicts_immediately() {
        let f = fixture(ExpirationConfig {
            max_entries: Some(2),
            ..Default::default()
        })
        .await;
        let cache = f.storage.open("pages").await.unwrap();

        for path in ["a", "b", "c"] {
            let url = format!("https://example.com/{}", path);
            cache.put(&url, response_dated(None)).await.unwrap();
            f.clock.advance(10);
            f.plugin.cache_did_update("pages", &url).await.unwrap();
        }

        assert_eq!(
            cache.keys(None, &MatchOptions::default()).await.unwrap(),
            vec!["https://example.com/b", "https://example.com/c"]
        );
    }

    #[tokio::test]
    async fn test_eviction_reaches_fragment_and_relative_urls() {
        let f = fixture(ExpirationConfig {
            max_entries: Some(1),
            ..Default::default()
        })
        .await;
        let cache = f.storage.open("pages").await.unwrap();

        for url in ["https://example.com/a#top", "/c#x", "https://example.com/b"] {
            cache.put(url, response_dated(None)).await.unwrap();
            f.clock.advance(10);
            f.plugin.cache_did_update("pages", url).await.unwrap();
        }

        assert_eq!(
            cache.keys(None, &MatchOptions::default()).await.unwrap(),
            vec!["https://example.com/b"]
        );
        assert_eq!(f.db.count_entries("pages").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_read_starts_background_sweep() {
        let f = fixture(ExpirationConfig {
            max_entries: Some(1),
            ..Default::default()
        })
        .await;
        let cache = f.storage.open("pages").await.unwrap();
        let expiration = f.plugin.get_cache_expiration("pages").unwrap();

        for url in ["https://example.com/a", "https://example.com/b"] {
            cache.put(url, response_dated(None)).await.unwrap();
            f.clock.advance(10);
            expiration.update_timestamp(url).await.unwrap();
        }
        assert_eq!(expiration.sweep_count(), 0);

        let served = f
            .plugin
            .cached_response_will_be_used(
                "pages",
                "https://example.com/b",
                Some(response_dated(None)),
                None,
            )
            .await
            .unwrap();
        assert!(served.is_some());

        tokio::time::timeout(Duration::from_secs(5), async {
            while cache.keys(None, &MatchOptions::default()).await.unwrap().len() > 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(expiration.sweep_count() >= 1);
        assert_eq!(
            cache.keys(None, &MatchOptions::default()).await.unwrap(),
            vec!["https://example.com/b"]
        );
        let store = TimestampStore::new(
            f.db.clone(),
            "pages",
            Url::parse("https://example.com/").unwrap(),
        );
        assert!(store.get_timestamp("/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_cache_and_metadata() {
        let f = fixture(max_age(60)).await;
        for name in ["images", "pages"] {
            let cache = f.storage.open(name).await.unwrap();
            cache.put("https://example.com/x", response_dated(None)).await.unwrap();
            f.plugin.cache_did_update(name, "/x").await.unwrap();
        }

        f.plugin.delete_cache_and_metadata().await.unwrap();

        assert!(f.storage.cache_names().await.unwrap().is_empty());
        assert!(f.plugin.tracked_cache_names().is_empty());
        assert_eq!(f.db.count_entries("images").await.unwrap(), 0);
        assert_eq!(f.db.count_entries("pages").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_quota_error_purges_when_enabled() {
        let f = fixture(ExpirationConfig {
            max_entries: Some(10),
            purge_on_quota_error: true,
            ..Default::default()
        })
        .await;
        assert_eq!(f.registry.len(), 1);

        let cache = f.storage.open("images").await.unwrap();
        cache.put("https://example.com/x", response_dated(None)).await.unwrap();
        f.plugin.cache_did_update("images", "/x").await.unwrap();

        f.registry.run_all().await.unwrap();
        assert!(!f.storage.has("images").await.unwrap());
        assert_eq!(f.db.count_entries("images").await.unwrap(), 0);

        // A dropped plugin leaves a harmless callback behind
        drop(f.plugin);
        f.registry.run_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_quota_callback_not_registered_by_default() {
        let f = fixture(max_age(60)).await;
        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let db = TimestampDb::in_memory().await.unwrap();
        let result = ExpirationPlugin::new(
            max_age(0),
            PluginEnv {
                db,
                storage: Arc::new(MemoryCacheStorage::new()),
                clock: Arc::new(ManualClock::new(0)),
                runtime_cache_name: RUNTIME.to_string(),
                base_url: Url::parse("https://example.com/").unwrap(),
                quota_registry: None,
            },
        );
        assert!(matches!(result, Err(CoreError::InvalidConfiguration(_))));
    }
}
