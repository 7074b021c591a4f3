//! Expiry Cache Content Storage
//!
//! This crate defines the content cache the expiration engine deletes from,
//! with a local disk backend and an in-memory backend.

pub mod backend;
pub mod error;
pub mod local;
pub mod memory;

pub use backend::{CacheStorage, CachedResponse, ContentCache, MatchOptions, cache_key};
pub use error::StorageError;
pub use local::LocalCacheStorage;
pub use memory::MemoryCacheStorage;
