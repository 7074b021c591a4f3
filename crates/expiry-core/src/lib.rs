//! Expiry Cache Core Business Logic
//!
//! This crate provides the cache expiration engine: per-cache coordinators
//! that evict entries by age and count, the plugin hooks a request pipeline
//! calls on every cache read and write, and the quota-error registry used to
//! purge caches when storage runs out.

pub mod clock;
pub mod config;
pub mod error;
pub mod expiration;
pub mod plugin;
pub mod quota;
mod task;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ExpirationConfig;
pub use error::CoreError;
pub use expiration::{CacheExpiration, LatchState, SweepLatch};
pub use plugin::{CachePlugin, ExpirationPlugin, ExtendableEvent, PluginEnv};
pub use quota::QuotaErrorRegistry;
