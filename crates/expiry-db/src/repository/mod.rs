//! Database repository implementation

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use tracing::info;

use crate::error::DbError;

// Submodules
mod entries;

/// Timestamp index connection and operations
#[derive(Clone)]
pub struct TimestampDb {
    pool: SqlitePool,
}

impl TimestampDb {
    /// Create a new database connection
    ///
    /// Timestamps are a recency hint rather than critical data, so the
    /// database runs in WAL mode with `synchronous = NORMAL`.
    pub async fn new(database_url: &str) -> Result<Self, DbError> {
        info!("Connecting to timestamp index: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePool::connect_with(options).await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Open a private in-memory index
    ///
    /// Every SQLite in-memory connection is its own database, so the pool
    /// is pinned to one connection that never expires.
    pub async fn in_memory() -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Get the underlying pool for advanced usage
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<(), DbError> {
        info!("Running timestamp index migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                id TEXT PRIMARY KEY,
                cache_name TEXT NOT NULL,
                url TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_cache_entries_cache_name ON cache_entries(cache_name)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_cache_entries_timestamp ON cache_entries(timestamp)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Timestamp index migrations completed");
        Ok(())
    }
}
