//! Course cache and the persistent store behind it
//!
//! The store module provides async key-value stores (one JSON file per key on
//! disk, or in memory) with change notifications. The cache manager keeps the
//! course snapshot in such a store with a TTL and serves stale data when a
//! refresh fails, but never across a logout.

mod manager;
pub mod store;

pub use manager::{CacheManager, COURSES_CACHE_KEY, DEFAULT_TTL, LAST_FETCH_KEY};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreChange, StoreError};
