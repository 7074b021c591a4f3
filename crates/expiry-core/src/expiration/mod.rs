//! Cache expiration module

mod coordinator;
mod latch;

pub use coordinator::CacheExpiration;
pub use latch::{LatchState, SweepLatch};
