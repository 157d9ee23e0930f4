//! Bounded TTL + LRU cache of asset bytes.
//!
//! The entry map, byte total and counters sit behind one mutex, so lookups,
//! hit-count updates, inserts and eviction scans are mutually exclusive.

use super::traits::{CacheConfig, CacheEntry, CacheStats};
use crate::config::TierDefaults;
use crate::error::{AssetError, Result};
use crate::telemetry;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_bytes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    next_seq: u64,
    /// Keys with a background refresh in flight.
    refreshing: HashSet<String>,
}

struct Inner {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

/// In-memory asset cache.
///
/// Cloning yields another handle to the same cache.
#[derive(Clone)]
pub struct InMemoryAssetCache {
    inner: Arc<Inner>,
}

impl InMemoryAssetCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheState>> {
        self.inner.state.lock().map_err(|e| AssetError::Cache {
            message: format!("Failed to lock cache state: {}", e),
        })
    }

    /// Look up a live entry.
    ///
    /// Absent or expired entries are misses. Expiry is checked lazily here
    /// and an expired entry is dropped on the spot. A hit bumps the hit
    /// count and access time inside the same critical section as the lookup.
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let now = Instant::now();
        let mut state = self.lock()?;

        let mut expired = false;
        let live = match state.entries.get_mut(key) {
            Some(entry) if entry.is_expired_at(now) => {
                expired = true;
                None
            }
            Some(entry) => {
                entry.hit_count += 1;
                entry.last_accessed = now;
                Some(entry.clone())
            }
            None => None,
        };

        if expired {
            if let Some(old) = state.entries.remove(key) {
                state.total_bytes -= old.size;
                state.evictions += 1;
            }
        }
        if live.is_some() {
            state.hits += 1;
        } else {
            state.misses += 1;
        }
        drop(state);

        if expired {
            debug!(key, "Dropped expired cache entry");
            telemetry::record_cache_eviction("expired", 1);
        }
        telemetry::record_cache_lookup(live.is_some());
        Ok(live)
    }

    /// Whether a live entry exists, without touching hit statistics.
    pub fn contains(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let state = self.lock()?;
        Ok(state
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired_at(now)))
    }

    /// Store an entry with the default TTL.
    pub fn set(&self, entry: CacheEntry) -> Result<()> {
        let ttl = self.inner.config.default_ttl;
        self.set_with_ttl(entry, ttl)
    }

    /// Store an entry with an explicit TTL, evicting LRU entries first when
    /// either the entry or byte limit would be exceeded.
    ///
    /// An entry larger than `max_bytes` is still inserted once everything
    /// else has been evicted; the byte limit is then exceeded until the next
    /// insert.
    pub fn set_with_ttl(&self, mut entry: CacheEntry, ttl: Duration) -> Result<()> {
        if entry.size != entry.payload.len() as u64 {
            return Err(AssetError::Cache {
                message: format!(
                    "entry {} declares {} bytes but carries {}",
                    entry.key,
                    entry.size,
                    entry.payload.len()
                ),
            });
        }

        let now = Instant::now();
        let max_entries = self.inner.config.max_entries;
        let max_bytes = self.inner.config.max_bytes;
        let mut state = self.lock()?;

        // Replacing a key frees its old footprint first.
        if let Some(old) = state.entries.remove(&entry.key) {
            state.total_bytes -= old.size;
        }

        let mut evicted = 0u64;
        while !state.entries.is_empty()
            && (state.entries.len() + 1 > max_entries
                || state.total_bytes + entry.size > max_bytes)
        {
            let Some(victim) = lru_victim(&state.entries) else {
                break;
            };
            if let Some(removed) = state.entries.remove(&victim) {
                state.total_bytes -= removed.size;
                evicted += 1;
                debug!(key = %victim, size = removed.size, "Evicted cache entry");
            }
        }
        state.evictions += evicted;

        entry.seq = state.next_seq;
        state.next_seq += 1;
        entry.stored_at = now;
        entry.last_accessed = now;
        entry.expires_at = now + ttl;
        entry.hit_count = 0;

        state.total_bytes += entry.size;
        state.entries.insert(entry.key.clone(), entry);

        let (entries, bytes) = (state.entries.len(), state.total_bytes);
        drop(state);

        if evicted > 0 {
            telemetry::record_cache_eviction("capacity", evicted);
        }
        telemetry::record_cache_size(entries, bytes);
        Ok(())
    }

    /// Remove an entry. Returns whether it was present.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.lock()?;
        match state.entries.remove(key) {
            Some(old) => {
                state.total_bytes -= old.size;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.entries.clear();
        state.total_bytes = 0;
        Ok(())
    }

    /// Sweep expired entries. Returns how many were removed.
    pub fn evict_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut state = self.lock()?;
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            if let Some(old) = state.entries.remove(key) {
                state.total_bytes -= old.size;
            }
        }
        state.evictions += expired.len() as u64;
        drop(state);

        if !expired.is_empty() {
            telemetry::record_cache_eviction("expired", expired.len() as u64);
            debug!(count = expired.len(), "Swept expired cache entries");
        }
        Ok(expired.len())
    }

    /// Return the current entry, stale or not, and refresh it in the
    /// background once it is older than 80% of its TTL.
    ///
    /// When nothing is cached the fetcher runs inline and its result is
    /// stored and returned. At most one background refresh per key is in
    /// flight; triggers while one is pending do nothing. Refresh failures
    /// are logged and never reach the caller.
    pub async fn get_with_background_refresh<F, Fut>(
        &self,
        key: &str,
        fetcher: F,
    ) -> Result<CacheEntry>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<CacheEntry>> + Send + 'static,
    {
        let now = Instant::now();
        let current = {
            let mut state = self.lock()?;
            let found = match state.entries.get_mut(key) {
                Some(entry) => {
                    entry.hit_count += 1;
                    entry.last_accessed = now;
                    Some(entry.clone())
                }
                None => None,
            };

            match found {
                Some(entry) => {
                    state.hits += 1;
                    let threshold = entry.ttl().mul_f64(TierDefaults::CACHE_REFRESH_FRACTION);
                    let schedule =
                        entry.age_at(now) > threshold && state.refreshing.insert(key.to_string());
                    Some((entry, schedule))
                }
                None => {
                    state.misses += 1;
                    None
                }
            }
        };

        match current {
            Some((entry, schedule)) => {
                if schedule {
                    self.spawn_refresh(key.to_string(), fetcher);
                }
                Ok(entry)
            }
            None => {
                let fresh = fetcher().await?;
                self.set(fresh.clone())?;
                Ok(fresh)
            }
        }
    }

    fn spawn_refresh<F, Fut>(&self, key: String, fetcher: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<CacheEntry>> + Send + 'static,
    {
        let guard = RefreshGuard {
            cache: self.clone(),
            key,
        };
        debug!(key = %guard.key, "Scheduling background cache refresh");
        tokio::spawn(async move {
            match fetcher().await {
                Ok(fresh) => {
                    if let Err(e) = guard.cache.set(fresh) {
                        warn!(key = %guard.key, error = %e, "Failed to store refreshed cache entry");
                    }
                }
                Err(e) => {
                    warn!(key = %guard.key, error = %e, "Background cache refresh failed");
                }
            }
        });
    }

    /// Snapshot of cache statistics.
    pub fn stats(&self) -> Result<CacheStats> {
        let now = Instant::now();
        let state = self.lock()?;
        let lookups = state.hits + state.misses;
        let max_bytes = self.inner.config.max_bytes;

        Ok(CacheStats {
            total_entries: state.entries.len(),
            total_bytes: state.total_bytes,
            max_entries: self.inner.config.max_entries,
            max_bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expired_entries: state
                .entries
                .values()
                .filter(|e| e.is_expired_at(now))
                .count(),
            refreshes_in_flight: state.refreshing.len(),
            hit_rate: if lookups > 0 {
                state.hits as f64 / lookups as f64
            } else {
                0.0
            },
            utilization: if max_bytes > 0 {
                state.total_bytes as f64 / max_bytes as f64
            } else {
                0.0
            },
        })
    }

    /// Keys currently resident, expired or not.
    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.entries.keys().cloned().collect())
    }
}

/// Clears a key's in-flight refresh mark when the refresh task ends,
/// including by panic or cancellation.
struct RefreshGuard {
    cache: InMemoryAssetCache,
    key: String,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        let mut state = self
            .cache
            .inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        state.refreshing.remove(&self.key);
    }
}

/// Least recently accessed entry, oldest insertion first on ties.
fn lru_victim(entries: &HashMap<String, CacheEntry>) -> Option<String> {
    entries
        .values()
        .min_by_key(|e| (e.last_accessed, e.seq))
        .map(|e| e.key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn cache(max_bytes: u64, max_entries: usize, ttl: Duration) -> InMemoryAssetCache {
        InMemoryAssetCache::new(CacheConfig {
            max_bytes,
            max_entries,
            default_ttl: ttl,
        })
    }

    fn entry(key: &str, size: usize) -> CacheEntry {
        CacheEntry::new(key, vec![7u8; size], "image/png", Utc::now())
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction_by_bytes() {
        let cache = cache(1000, 100, Duration::from_secs(60));
        cache.set(entry("A", 400)).unwrap();
        cache.set(entry("B", 400)).unwrap();
        cache.set(entry("C", 400)).unwrap();

        let mut keys = cache.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["B", "C"]);

        let stats = cache.stats().unwrap();
        assert_eq!(stats.total_bytes, 800);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_prefers_least_recently_accessed() {
        let cache = cache(1000, 100, Duration::from_secs(60));
        cache.set(entry("A", 400)).unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.set(entry("B", 400)).unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;

        // Reading A makes B the oldest access.
        assert!(cache.get("A").unwrap().is_some());
        cache.set(entry("C", 400)).unwrap();

        assert!(cache.contains("A").unwrap());
        assert!(!cache.contains("B").unwrap());
        assert!(cache.contains("C").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_count_limit() {
        let cache = cache(u64::MAX, 2, Duration::from_secs(60));
        cache.set(entry("A", 1)).unwrap();
        cache.set(entry("B", 1)).unwrap();
        cache.set(entry("C", 1)).unwrap();
        assert_eq!(cache.stats().unwrap().total_entries, 2);
        assert!(!cache.contains("A").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_entry_is_still_inserted() {
        let cache = cache(100, 10, Duration::from_secs(60));
        cache.set(entry("small", 50)).unwrap();
        cache.set(entry("huge", 500)).unwrap();

        assert_eq!(cache.keys().unwrap(), vec!["huge"]);
        assert_eq!(cache.stats().unwrap().total_bytes, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacing_key_does_not_double_count() {
        let cache = cache(1000, 10, Duration::from_secs(60));
        cache.set(entry("A", 300)).unwrap();
        cache.set(entry("A", 200)).unwrap();
        let stats = cache.stats().unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.total_bytes, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_mismatch_rejected() {
        let cache = cache(1000, 10, Duration::from_secs(60));
        let mut bad = entry("A", 10);
        bad.size = 11;
        assert!(matches!(cache.set(bad), Err(AssetError::Cache { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_expiry_and_hit_counting() {
        let cache = cache(1000, 10, Duration::from_secs(10));
        cache.set(entry("A", 10)).unwrap();

        let first = cache.get("A").unwrap().unwrap();
        assert_eq!(first.hit_count, 1);
        assert_eq!(first.size, first.payload.len() as u64);
        let second = cache.get("A").unwrap().unwrap();
        assert_eq!(second.hit_count, 2);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get("A").unwrap().is_none());

        let stats = cache.stats().unwrap();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);

        // The expired entry was dropped by the lookup itself.
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.expired_entries, 0);
        assert_eq!(stats.evictions, 1);
        assert_eq!(cache.evict_expired().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_unread_expired_entries() {
        let cache = cache(1000, 10, Duration::from_secs(10));
        cache.set(entry("A", 100)).unwrap();
        cache.set(entry("B", 50)).unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        cache.set(entry("C", 10)).unwrap();

        assert_eq!(cache.stats().unwrap().expired_entries, 2);
        assert_eq!(cache.evict_expired().unwrap(), 2);
        let stats = cache.stats().unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.total_bytes, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_and_clear() {
        let cache = cache(1000, 10, Duration::from_secs(10));
        cache.set(entry("A", 10)).unwrap();
        cache.set(entry("B", 10)).unwrap();
        assert!(cache.delete("A").unwrap());
        assert!(!cache.delete("A").unwrap());
        assert_eq!(cache.stats().unwrap().total_bytes, 10);
        cache.clear().unwrap();
        assert_eq!(cache.stats().unwrap().total_entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_refresh_schedules_exactly_once() {
        let ttl = Duration::from_secs(100);
        let cache = cache(10_000, 10, ttl);
        cache
            .set(CacheEntry::new("A", vec![1u8; 4], "image/png", Utc::now()))
            .unwrap();
        tokio::time::advance(ttl.mul_f64(0.9)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            let release = release.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_with_background_refresh("A", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Ok(CacheEntry::new("A", vec![2u8; 4], "image/png", Utc::now()))
                    })
                    .await
            }));
        }

        for handle in handles {
            let served = handle.await.unwrap().unwrap();
            // Stale value is returned immediately.
            assert_eq!(served.payload.as_ref(), &[1u8; 4]);
        }

        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().unwrap().refreshes_in_flight, 1);

        release.notify_one();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let refreshed = cache.get("A").unwrap().unwrap();
        assert_eq!(refreshed.payload.as_ref(), &[2u8; 4]);
        assert_eq!(cache.stats().unwrap().refreshes_in_flight, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_does_not_refresh() {
        let ttl = Duration::from_secs(100);
        let cache = cache(10_000, 10, ttl);
        cache.set(entry("A", 4)).unwrap();
        tokio::time::advance(ttl.mul_f64(0.5)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        cache
            .get_with_background_refresh("A", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(CacheEntry::new("A", vec![0u8; 4], "image/png", Utc::now()))
            })
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_is_not_surfaced() {
        let ttl = Duration::from_secs(10);
        let cache = cache(10_000, 10, ttl);
        cache.set(entry("A", 4)).unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;

        let served = cache
            .get_with_background_refresh("A", || async {
                Err(AssetError::unavailable(crate::models::Tier::Remote, "down"))
            })
            .await
            .unwrap();
        assert_eq!(served.size, 4);

        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.stats().unwrap().refreshes_in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_refresh_releases_key() {
        let ttl = Duration::from_secs(10);
        let cache = cache(10_000, 10, ttl);
        cache.set(entry("A", 4)).unwrap();
        tokio::time::advance(Duration::from_secs(9)).await;

        cache
            .get_with_background_refresh("A", || async {
                if true {
                    panic!("fetcher blew up");
                }
                Ok(CacheEntry::new("A", vec![0u8; 4], "image/png", Utc::now()))
            })
            .await
            .unwrap();
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.stats().unwrap().refreshes_in_flight, 0);

        // The key can be refreshed again.
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        cache
            .get_with_background_refresh("A", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(CacheEntry::new("A", vec![5u8; 4], "image/png", Utc::now()))
            })
            .await
            .unwrap();
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("A").unwrap().unwrap().payload.as_ref(), &[5u8; 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_miss_fetches_inline() {
        let cache = cache(10_000, 10, Duration::from_secs(10));
        let fetched = cache
            .get_with_background_refresh("B", || async {
                Ok(CacheEntry::new("B", vec![3u8; 5], "image/webp", Utc::now()))
            })
            .await
            .unwrap();
        assert_eq!(fetched.size, 5);
        assert!(cache.contains("B").unwrap());
    }
}
