//! Search Cache: an LRU of recent query results with a time-to-live,
//! invalidated on writes that overlap a cached query's time range. Uses the
//! same `lru`-backed memoization shape as the Pattern Recognizer's template
//! cache in `patterns.rs`.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::model::LogRecord;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub query: String,
    pub is_regex: bool,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

struct CacheEntry {
    results: Vec<LogRecord>,
    inserted_at: Instant,
    /// earliest/latest timestamp among `results`, used for range invalidation.
    range: Option<(i64, i64)>,
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

/// A point-in-time read of cache health, per spec.md's `stats()` shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStatsSnapshot {
    pub enabled: bool,
    pub size: usize,
    pub max_size: usize,
    pub expiration_ms: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_ratio: f64,
}

pub struct SearchCache {
    enabled: bool,
    ttl: Duration,
    max_size: usize,
    inner: Mutex<LruCache<CacheKey, CacheEntry>>,
    pub stats: CacheStats,
}

impl SearchCache {
    pub fn new(enabled: bool, max_size: usize, ttl_ms: u64) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).unwrap();
        Self {
            enabled,
            ttl: Duration::from_millis(ttl_ms),
            max_size,
            inner: Mutex::new(LruCache::new(capacity)),
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let hit_ratio = if hits + misses == 0 { 0.0 } else { hits as f64 / (hits + misses) as f64 };
        CacheStatsSnapshot {
            enabled: self.enabled,
            size: self.inner.lock().unwrap().len(),
            max_size: self.max_size,
            expiration_ms: self.ttl.as_millis() as u64,
            hits,
            misses,
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            hit_ratio,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<LogRecord>> {
        if !self.enabled {
            return None;
        }
        let mut guard = self.inner.lock().unwrap();
        if let Some(entry) = guard.get(key) {
            if entry.inserted_at.elapsed() <= self.ttl {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.results.clone());
            }
        }
        guard.pop(key);
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, key: CacheKey, results: Vec<LogRecord>) {
        if !self.enabled {
            return;
        }
        let range = results.iter().map(|r| r.timestamp).fold(None, |acc, ts| match acc {
            None => Some((ts, ts)),
            Some((lo, hi)) => Some((lo.min(ts), hi.max(ts))),
        });
        let mut guard = self.inner.lock().unwrap();
        // Eviction order is expired-first, then LRU: a full cache should give
        // up stale entries before it gives up fresh ones just because they
        // were touched less recently. `put` on a key already present updates
        // it in place and never evicts, so only scan when the incoming key
        // would actually grow the cache past capacity.
        if guard.len() >= guard.cap().get() && !guard.contains(&key) {
            let expired = guard.iter().find(|(_, entry)| entry.inserted_at.elapsed() > self.ttl).map(|(k, _)| k.clone());
            if let Some(expired_key) = expired {
                guard.pop(&expired_key);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        if guard.put(
            key,
            CacheEntry {
                results,
                inserted_at: Instant::now(),
                range,
            },
        )
        .is_some()
        {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    /// Drops any cached entry whose result range overlaps `[start, end]`.
    /// Entries with no recorded range (empty result sets) are left alone,
    /// since an overlapping write cannot make an empty answer stale in a way
    /// that matters for correctness beyond the TTL.
    pub fn invalidate_range(&self, start: i64, end: i64) {
        if !self.enabled {
            return;
        }
        let mut guard = self.inner.lock().unwrap();
        let stale: Vec<CacheKey> = guard
            .iter()
            .filter_map(|(k, v)| match v.range {
                Some((lo, hi)) if lo <= end && hi >= start => Some(k.clone()),
                _ => None,
            })
            .collect();
        for key in stale {
            guard.pop(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogLevel;

    fn key(q: &str) -> CacheKey {
        CacheKey {
            query: q.into(),
            is_regex: false,
            start: None,
            end: None,
        }
    }

    #[test]
    fn put_then_get_hits() {
        let cache = SearchCache::new(true, 10, 60_000);
        cache.put(key("error"), vec![LogRecord::new(1, LogLevel::Error, "boom", "s", "boom")]);
        assert!(cache.get(&key("error")).is_some());
        assert_eq!(cache.stats.hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn disabled_cache_never_hits() {
        let cache = SearchCache::new(false, 10, 60_000);
        cache.put(key("error"), vec![LogRecord::new(1, LogLevel::Error, "boom", "s", "boom")]);
        assert!(cache.get(&key("error")).is_none());
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache = SearchCache::new(true, 10, 0);
        cache.put(key("error"), vec![LogRecord::new(1, LogLevel::Error, "boom", "s", "boom")]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key("error")).is_none());
    }

    #[test]
    fn hit_ratio_reflects_hits_and_misses() {
        let cache = SearchCache::new(true, 10, 60_000);
        cache.put(key("a"), vec![]);
        cache.get(&key("a"));
        cache.get(&key("missing"));
        let snapshot = cache.stats();
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.misses, 1);
        assert!((snapshot.hit_ratio - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn expired_entry_is_evicted_before_fresh_lru_entry() {
        let cache = SearchCache::new(true, 2, 5);
        cache.put(key("stale"), vec![LogRecord::new(1, LogLevel::Info, "a", "s", "a")]);
        std::thread::sleep(Duration::from_millis(10));
        // "stale" is now the least-recently-used entry AND expired, so this
        // alone doesn't distinguish the two eviction policies.
        cache.put(key("fresh"), vec![LogRecord::new(2, LogLevel::Info, "b", "s", "b")]);
        cache.put(key("newest"), vec![LogRecord::new(3, LogLevel::Info, "c", "s", "c")]);

        assert!(cache.get(&key("stale")).is_none());
        assert!(cache.get(&key("fresh")).is_some());
        assert!(cache.get(&key("newest")).is_some());
    }

    #[test]
    fn invalidate_range_drops_overlapping_entries_only() {
        let cache = SearchCache::new(true, 10, 60_000);
        cache.put(key("a"), vec![LogRecord::new(100, LogLevel::Info, "a", "s", "a")]);
        cache.put(key("b"), vec![LogRecord::new(9999, LogLevel::Info, "b", "s", "b")]);
        cache.invalidate_range(0, 200);
        assert!(cache.get(&key("a")).is_none());
        assert!(cache.get(&key("b")).is_some());
    }
}
