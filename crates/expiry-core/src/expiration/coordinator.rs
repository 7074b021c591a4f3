//! Per-cache expiration coordinator

use expiry_db::{Cutoff, TimestampStore};
use expiry_storage::CacheStorage;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::latch::{LatchState, SweepLatch};
use crate::clock::Clock;
use crate::config::ExpirationConfig;
use crate::error::CoreError;
use crate::task::spawn_detached;

/// Expiration state and sweep logic for one named cache
///
/// Owns the cache's timestamp store. Sweeps are serialized through a
/// [`SweepLatch`]: a sweep requested while one is running is folded into a
/// single rerun that starts once the current sweep ends.
pub struct CacheExpiration {
    cache_name: String,
    config: ExpirationConfig,
    store: TimestampStore,
    storage: Arc<dyn CacheStorage>,
    clock: Arc<dyn Clock>,
    latch: SweepLatch,
    sweeps: AtomicU64,
}

impl CacheExpiration {
    /// Create a coordinator for `cache_name`
    ///
    /// `config` is taken as already validated.
    pub fn new(
        cache_name: impl Into<String>,
        config: ExpirationConfig,
        store: TimestampStore,
        storage: Arc<dyn CacheStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache_name = cache_name.into();

        debug!(
            "Initializing cache expiration for {} (max_entries: {:?}, max_age_seconds: {:?})",
            cache_name,
            config.max_entries(),
            config.max_age_seconds
        );

        Self {
            cache_name,
            config,
            store,
            storage,
            clock,
            latch: SweepLatch::new(),
            sweeps: AtomicU64::new(0),
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Number of sweeps executed so far
    pub fn sweep_count(&self) -> u64 {
        self.sweeps.load(Ordering::SeqCst)
    }

    pub fn latch_state(&self) -> LatchState {
        self.latch.state()
    }

    /// Evict entries that exceed the configured age or count
    ///
    /// If a sweep is already running this only records a rerun and returns.
    /// The rerun is started in the background when the running sweep ends;
    /// the caller of that sweep does not wait for it.
    pub fn expire_entries(self: &Arc<Self>) -> BoxFuture<'static, Result<(), CoreError>> {
        let this = Arc::clone(self);
        async move {
            if !this.latch.try_start() {
                debug!("Sweep already running for {}, rerun requested", this.cache_name);
                return Ok(());
            }

            let result = this.sweep().await;

            if this.latch.finish() {
                debug!("Starting requested rerun for {}", this.cache_name);
                spawn_detached(&this.cache_name, "sweep rerun", this.expire_entries());
            }

            if result.is_err() {
                metrics::counter!("expiry_sweep_failures_total", "cache" => this.cache_name.clone())
                    .increment(1);
            }
            result
        }
        .boxed()
    }

    /// One pass over the index: pick victims, then delete them everywhere
    async fn sweep(&self) -> Result<(), CoreError> {
        self.sweeps.fetch_add(1, Ordering::SeqCst);
        metrics::counter!("expiry_sweeps_total", "cache" => self.cache_name.clone()).increment(1);

        let urls = self
            .store
            .expire_entries(self.age_cutoff(), self.config.max_entries())
            .await?;

        if urls.is_empty() {
            debug!("Nothing to expire in {}", self.cache_name);
            return Ok(());
        }

        let cache = self.storage.open(&self.cache_name).await?;
        for url in &urls {
            debug!("Expiring {} from {}", url, self.cache_name);
            cache.delete(url, &self.config.match_options).await?;
        }

        metrics::counter!("expiry_entries_evicted_total", "cache" => self.cache_name.clone())
            .increment(urls.len() as u64);
        info!("Expired {} entries from {}", urls.len(), self.cache_name);
        Ok(())
    }

    /// Mark `url` as fresh as of now
    pub async fn update_timestamp(&self, url: &str) -> Result<(), CoreError> {
        self.store
            .set_timestamp(url, self.clock.now_millis())
            .await?;
        Ok(())
    }

    /// Whether `url` is older than the maximum age
    ///
    /// Read-only. Always `false` without a maximum age; a URL that was never
    /// recorded counts as expired.
    pub async fn is_url_expired(&self, url: &str) -> Result<bool, CoreError> {
        let Some(max_age) = self.config.max_age_millis() else {
            return Ok(false);
        };

        let expire_older_than = self.clock.now_millis().saturating_sub(max_age);
        let timestamp = self.store.get_timestamp(url).await?;
        Ok(timestamp.is_none_or(|ts| ts < expire_older_than))
    }

    /// Drop every index entry of this cache
    ///
    /// The content cache itself is left alone; deleting it is the caller's
    /// job. A pending rerun is cancelled first.
    pub async fn delete_all(&self) -> Result<(), CoreError> {
        self.latch.cancel_rerun();
        let urls = self.store.expire_entries(Cutoff::Everything, None).await?;
        debug!("Deleted {} index entries for {}", urls.len(), self.cache_name);
        Ok(())
    }

    fn age_cutoff(&self) -> Cutoff {
        match self.config.max_age_millis() {
            Some(max_age) => Cutoff::from_millis(self.clock.now_millis().saturating_sub(max_age)),
            None => Cutoff::Disabled,
        }
    }
}
