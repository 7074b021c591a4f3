//! In-memory content cache

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::backend::{
    CacheStorage, CachedResponse, ContentCache, MatchOptions, cache_key, urls_match,
    validate_cache_name,
};
use crate::error::StorageError;

/// In-memory cache storage
///
/// Deleting a cache detaches it from the storage; handles opened earlier keep
/// working on the detached contents.
#[derive(Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Arc<MemoryContentCache>>>,
    base_url: Option<Url>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative request URLs against `base_url`
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn ContentCache>, StorageError> {
        validate_cache_name(name)?;
        let cache = self
            .caches
            .write()
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(MemoryContentCache {
                    entries: RwLock::default(),
                    base_url: self.base_url.clone(),
                })
            })
            .clone();
        Ok(cache)
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.caches.write().remove(name).is_some())
    }

    async fn has(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.caches.read().contains_key(name))
    }

    async fn cache_names(&self) -> Result<Vec<String>, StorageError> {
        let mut names: Vec<String> = self.caches.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// A single in-memory cache, keyed by [`cache_key`]
pub struct MemoryContentCache {
    entries: RwLock<HashMap<String, CachedResponse>>,
    base_url: Option<Url>,
}

impl MemoryContentCache {
    fn key(&self, url: &str) -> String {
        cache_key(self.base_url.as_ref(), url)
    }
}

#[async_trait]
impl ContentCache for MemoryContentCache {
    async fn match_url(
        &self,
        url: &str,
        options: &MatchOptions,
    ) -> Result<Option<CachedResponse>, StorageError> {
        let url = self.key(url);
        let entries = self.entries.read();
        if !options.ignore_search {
            return Ok(entries.get(&url).cloned());
        }
        Ok(entries
            .iter()
            .find(|(stored, _)| urls_match(stored, &url, options))
            .map(|(_, response)| response.clone()))
    }

    async fn put(&self, url: &str, response: CachedResponse) -> Result<(), StorageError> {
        self.entries.write().insert(self.key(url), response);
        Ok(())
    }

    async fn delete(&self, url: &str, options: &MatchOptions) -> Result<bool, StorageError> {
        let url = self.key(url);
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|stored, _| !urls_match(stored, &url, options));
        Ok(entries.len() < before)
    }

    async fn keys(
        &self,
        url: Option<&str>,
        options: &MatchOptions,
    ) -> Result<Vec<String>, StorageError> {
        let requested = url.map(|url| self.key(url));
        let mut keys: Vec<String> = self
            .entries
            .read()
            .keys()
            .filter(|stored| {
                requested
                    .as_deref()
                    .is_none_or(|requested| urls_match(stored, requested, options))
            })
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
