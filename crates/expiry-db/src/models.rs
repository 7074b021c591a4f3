//! Database models

use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::utils::entry_id;

/// A single row of the timestamp index
///
/// `id` is derived from `cache_name` and `url`, so writing an entry for an
/// existing pair replaces the previous row instead of adding a second one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampEntry {
    pub id: String,
    pub cache_name: String,
    /// Normalized absolute URL (no fragment)
    pub url: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl TimestampEntry {
    /// Build an entry for an already-normalized URL
    pub fn new(cache_name: &str, url: &str, timestamp: i64) -> Self {
        Self {
            id: entry_id(cache_name, url),
            cache_name: cache_name.to_string(),
            url: url.to_string(),
            timestamp,
        }
    }
}

// ==================== TryFrom Implementations ====================

impl TryFrom<&sqlx::sqlite::SqliteRow> for TimestampEntry {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        Ok(TimestampEntry {
            id: row.try_get("id")?,
            cache_name: row.try_get("cache_name")?,
            url: row.try_get("url")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}
