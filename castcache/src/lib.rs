//! # castcache - in-memory LRU caches
//!
//! Bounded caches for things the control plane fetches repeatedly: device
//! descriptions, resolved control URLs, HTTP payloads. Entries referenced by
//! an in-flight action can be pinned; a pinned entry is never evicted, even
//! when the cache is over capacity.

mod cache;
mod sizing;

pub use cache::{CacheEntry, LruCache, PinGuard, SharedLruCache};
pub use sizing::{CacheSizing, MemoryTier};
