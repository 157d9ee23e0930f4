//! In-memory asset cache.
//!
//! A bounded byte-and-entry-count cache with lazy TTL expiry, LRU eviction
//! and near-expiry background refresh. Contents live for the process only.

mod memory;
mod traits;

pub use memory::InMemoryAssetCache;
pub use traits::{CacheConfig, CacheEntry, CacheStats};
