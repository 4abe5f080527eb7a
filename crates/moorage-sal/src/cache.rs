//! Metadata cache
//!
//! A read-through LRU in front of the index gateway for hot records.
//! The cache is advisory: every mutation re-puts or invalidates after
//! its index write succeeds, and a cross-process notification hook
//! invalidates on receipt. Entries carry the record mtime so a stale
//! writer cannot clobber a newer cached value.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache hit/miss counters
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Hit ratio in [0, 1]
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;
        if total == 0.0 { 0.0 } else { hits / total }
    }
}

struct Entry {
    value: Vec<u8>,
    mtime: u64,
}

struct Inner {
    map: HashMap<Vec<u8>, Entry>,
    recency: VecDeque<Vec<u8>>,
    capacity: usize,
    enabled: bool,
}

impl Inner {
    fn touch(&mut self, key: &[u8]) {
        self.recency.retain(|k| k != key);
        self.recency.push_back(key.to_vec());
    }

    fn evict_over_capacity(&mut self) -> u64 {
        let mut evicted = 0;
        while self.map.len() > self.capacity {
            let Some(oldest) = self.recency.pop_front() else {
                break;
            };
            self.map.remove(&oldest);
            evicted += 1;
        }
        evicted
    }
}

/// One process-wide metadata cache
pub struct MetaCache {
    inner: Mutex<Inner>,
    stats: CacheStats,
}

impl MetaCache {
    #[must_use]
    pub fn new(capacity: usize, enabled: bool) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                recency: VecDeque::new(),
                capacity: capacity.max(1),
                enabled,
            }),
            stats: CacheStats::default(),
        }
    }

    /// Fetch a cached value
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        if !inner.enabled {
            return None;
        }
        if let Some(value) = inner.map.get(key).map(|e| e.value.clone()) {
            inner.touch(key);
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            Some(value)
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Insert a value unless a newer one is already cached
    pub fn put(&self, key: &[u8], value: Vec<u8>, mtime: u64) {
        let mut inner = self.inner.lock();
        if !inner.enabled {
            return;
        }
        if let Some(existing) = inner.map.get(key) {
            if existing.mtime > mtime {
                return;
            }
        }
        inner.map.insert(key.to_vec(), Entry { value, mtime });
        inner.touch(key);
        let evicted = inner.evict_over_capacity();
        if evicted > 0 {
            self.stats.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    /// Drop a key (deletion or cross-process notification)
    pub fn invalidate_remove(&self, key: &[u8]) {
        let mut inner = self.inner.lock();
        inner.map.remove(key);
        inner.recency.retain(|k| k != key);
    }

    /// Toggle the cache; disabling discards the contents
    pub fn set_enabled(&self, enabled: bool) {
        let mut inner = self.inner.lock();
        inner.enabled = enabled;
        if !enabled {
            inner.map.clear();
            inner.recency.clear();
        }
    }

    /// Hit/miss counters
    pub const fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_get_put() {
        let cache = MetaCache::new(10, true);
        assert_eq!(cache.get(b"k"), None);
        cache.put(b"k", b"v1".to_vec(), 10);
        assert_eq!(cache.get(b"k"), Some(b"v1".to_vec()));
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_stale_put_ignored() {
        let cache = MetaCache::new(10, true);
        cache.put(b"k", b"newer".to_vec(), 20);
        cache.put(b"k", b"older".to_vec(), 10);
        assert_eq!(cache.get(b"k"), Some(b"newer".to_vec()));
        // same mtime replaces (a re-read after a write at the same tick)
        cache.put(b"k", b"rewrite".to_vec(), 20);
        assert_eq!(cache.get(b"k"), Some(b"rewrite".to_vec()));
    }

    #[test]
    fn test_lru_eviction() {
        let cache = MetaCache::new(2, true);
        cache.put(b"a", b"1".to_vec(), 1);
        cache.put(b"b", b"2".to_vec(), 1);
        // touch "a" so "b" is the eviction candidate
        cache.get(b"a");
        cache.put(b"c", b"3".to_vec(), 1);
        assert_eq!(cache.get(b"b"), None);
        assert_eq!(cache.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(cache.get(b"c"), Some(b"3".to_vec()));
    }

    #[test]
    fn test_invalidate_remove() {
        let cache = MetaCache::new(10, true);
        cache.put(b"k", b"v".to_vec(), 1);
        cache.invalidate_remove(b"k");
        assert_eq!(cache.get(b"k"), None);
    }

    #[test]
    fn test_disabled_pass_through() {
        let cache = MetaCache::new(10, false);
        cache.put(b"k", b"v".to_vec(), 1);
        assert_eq!(cache.get(b"k"), None);

        let cache = MetaCache::new(10, true);
        cache.put(b"k", b"v".to_vec(), 1);
        cache.set_enabled(false);
        assert_eq!(cache.get(b"k"), None);
        assert!(cache.is_empty());
    }
}
