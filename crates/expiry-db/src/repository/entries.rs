//! Timestamp entry operations

use sqlx::Row;
use tracing::debug;

use crate::error::DbError;
use crate::models::TimestampEntry;
use crate::repository::TimestampDb;

impl TimestampDb {
    // ==================== Timestamp Entry Operations ====================

    /// Insert or replace an entry, keyed by its id
    pub async fn put_entry(&self, entry: &TimestampEntry) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (id, cache_name, url, timestamp)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET timestamp = excluded.timestamp
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.cache_name)
        .bind(&entry.url)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get an entry by id
    pub async fn get_entry(&self, id: &str) -> Result<Option<TimestampEntry>, DbError> {
        let result = sqlx::query(
            r#"
            SELECT id, cache_name, url, timestamp
            FROM cache_entries
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        result
            .map(|row| TimestampEntry::try_from(&row).map_err(DbError::from))
            .transpose()
    }

    /// Get all entries of a cache, newest first
    ///
    /// Ties on timestamp are ordered by id so repeated scans agree.
    pub async fn entries_newest_first(
        &self,
        cache_name: &str,
    ) -> Result<Vec<TimestampEntry>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT id, cache_name, url, timestamp
            FROM cache_entries
            WHERE cache_name = ?
            ORDER BY timestamp DESC, id ASC
            "#,
        )
        .bind(cache_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| TimestampEntry::try_from(row).map_err(DbError::from))
            .collect()
    }

    /// Delete entries by id in a single transaction
    pub async fn delete_entries(&self, ids: &[String]) -> Result<u64, DbError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0u64;
        for id in ids {
            debug!("Deleting timestamp entry: {}", id);
            let result = sqlx::query("DELETE FROM cache_entries WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }
        tx.commit().await?;

        Ok(deleted)
    }

    /// Get the entry count of a cache
    pub async fn count_entries(&self, cache_name: &str) -> Result<i64, DbError> {
        let result = sqlx::query("SELECT COUNT(*) as count FROM cache_entries WHERE cache_name = ?")
            .bind(cache_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(result.get("count"))
    }

    /// Get the distinct cache names present in the index
    pub async fn cache_names(&self) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT cache_name
            FROM cache_entries
            ORDER BY cache_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("cache_name")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_overwrites_existing_id() {
        let db = TimestampDb::in_memory().await.unwrap();
        db.put_entry(&TimestampEntry::new("c", "https://e.com/a", 1)).await.unwrap();
        db.put_entry(&TimestampEntry::new("c", "https://e.com/a", 7)).await.unwrap();

        assert_eq!(db.count_entries("c").await.unwrap(), 1);
        let entry = db.get_entry("c|https://e.com/a").await.unwrap().unwrap();
        assert_eq!(entry.timestamp, 7);
    }

    #[tokio::test]
    async fn test_entries_newest_first_scoped_to_cache() {
        let db = TimestampDb::in_memory().await.unwrap();
        db.put_entry(&TimestampEntry::new("c", "https://e.com/a", 10)).await.unwrap();
        db.put_entry(&TimestampEntry::new("c", "https://e.com/b", 30)).await.unwrap();
        db.put_entry(&TimestampEntry::new("other", "https://e.com/z", 99)).await.unwrap();
        db.put_entry(&TimestampEntry::new("c", "https://e.com/c", 20)).await.unwrap();

        let urls: Vec<String> = db
            .entries_newest_first("c")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.url)
            .collect();
        assert_eq!(urls, vec!["https://e.com/b", "https://e.com/c", "https://e.com/a"]);
        assert_eq!(db.cache_names().await.unwrap(), vec!["c", "other"]);
    }

    #[tokio::test]
    async fn test_delete_entries() {
        let db = TimestampDb::in_memory().await.unwrap();
        db.put_entry(&TimestampEntry::new("c", "https://e.com/a", 1)).await.unwrap();
        db.put_entry(&TimestampEntry::new("c", "https://e.com/b", 2)).await.unwrap();

        let deleted = db
            .delete_entries(&["c|https://e.com/a".to_string(), "c|missing".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(db.count_entries("c").await.unwrap(), 1);
        assert_eq!(db.delete_entries(&[]).await.unwrap(), 0);
    }
}
