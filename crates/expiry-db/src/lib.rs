//! Expiry Cache Timestamp Index
//!
//! This crate provides the persistent timestamp index used by the
//! expiration engine, using SQLite via sqlx for persistence. Entries are
//! keyed by cache name and normalized URL and scanned newest-first when
//! deciding which entries to evict.

pub mod error;
pub mod models;
pub mod policy;
pub mod repository;
pub mod store;
pub mod utils;

pub use error::DbError;
pub use models::TimestampEntry;
pub use policy::{Cutoff, select_expired};
pub use repository::TimestampDb;
pub use store::TimestampStore;
pub use utils::{entry_id, normalize_url};

/// Re-export sqlx types for convenience
pub use sqlx::SqlitePool;
/// Re-export url types for convenience
pub use url::Url;
