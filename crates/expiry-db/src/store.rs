//! Per-cache timestamp store

use tracing::debug;
use url::Url;

use crate::error::DbError;
use crate::models::TimestampEntry;
use crate::policy::{Cutoff, select_expired};
use crate::repository::TimestampDb;
use crate::utils::{entry_id, normalize_url};

/// Timestamp index scoped to a single cache name
///
/// URLs passed in are normalized against `base_url` before use, so relative
/// and absolute spellings of the same resource share one entry.
#[derive(Clone)]
pub struct TimestampStore {
    cache_name: String,
    base_url: Url,
    db: TimestampDb,
}

impl TimestampStore {
    /// Create a store for `cache_name` on top of an open index
    pub fn new(db: TimestampDb, cache_name: impl Into<String>, base_url: Url) -> Self {
        Self {
            cache_name: cache_name.into(),
            base_url,
            db,
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Record `timestamp` (ms) as the last-fresh time of `url`
    pub async fn set_timestamp(&self, url: &str, timestamp: i64) -> Result<(), DbError> {
        let url = normalize_url(&self.base_url, url)?;
        let entry = TimestampEntry::new(&self.cache_name, &url, timestamp);
        self.db.put_entry(&entry).await
    }

    /// Get the recorded timestamp of `url`, if any
    pub async fn get_timestamp(&self, url: &str) -> Result<Option<i64>, DbError> {
        let url = normalize_url(&self.base_url, url)?;
        let entry = self.db.get_entry(&entry_id(&self.cache_name, &url)).await?;
        Ok(entry.map(|e| e.timestamp))
    }

    /// Remove entries that are too old or beyond `max_count`
    ///
    /// Victims are chosen from a complete snapshot first and deleted
    /// afterwards. An entry rewritten between the two phases can still be
    /// deleted. Returns the URLs removed, in no particular order.
    pub async fn expire_entries(
        &self,
        cutoff: Cutoff,
        max_count: Option<usize>,
    ) -> Result<Vec<String>, DbError> {
        let snapshot = self.db.entries_newest_first(&self.cache_name).await?;
        let victims = select_expired(&snapshot, cutoff, max_count);

        let mut ids = Vec::with_capacity(victims.len());
        let mut urls = Vec::with_capacity(victims.len());
        for index in victims {
            let entry = &snapshot[index];
            ids.push(entry.id.clone());
            urls.push(entry.url.clone());
        }

        self.db.delete_entries(&ids).await?;

        debug!(
            "Expired {} of {} timestamp entries in {}",
            urls.len(),
            snapshot.len(),
            self.cache_name
        );
        Ok(urls)
    }

    /// Number of entries tracked for this cache
    pub async fn entry_count(&self) -> Result<i64, DbError> {
        self.db.count_entries(&self.cache_name).await
    }
}
