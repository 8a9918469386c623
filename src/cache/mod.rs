//! Bounded in-memory LRU cache with per-entry TTL.
//!
//! Backs the metadata and audio-search facades so repeated lookups don't
//! hit the network. Entries expire after a uniform TTL and the least
//! recently used entry is evicted when the cache is full. Hit/miss
//! counters are monotonic until [`TtlCache::clear`].
//!
//! A `get` refreshes recency, so reads are logical writes; the cache is
//! serialized behind a single mutex rather than a read-write guard.

pub mod store;

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Point-in-time cache counters.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub max_size: usize,
    pub hit_rate: f64,
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct Inner<K, V> {
    map: HashMap<K, Entry<V>>,
    // Recency order, least recently used first.
    order: VecDeque<K>,
    hits: u64,
    misses: u64,
}

/// Bounded LRU map with uniform TTL.
pub struct TtlCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    max_size: usize,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
            }),
            max_size: max_size.max(1),
            ttl,
        }
    }

    /// Look up `key`, refreshing its recency on a hit.
    ///
    /// An entry past its expiry is removed on touch and counts as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        match inner.map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                let value = entry.value.clone();
                inner.hits += 1;
                touch(&mut inner.order, key);
                Some(value)
            }
            Some(_) => {
                inner.map.remove(key);
                inner.order.retain(|k| k != key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert or refresh `key`, evicting the LRU entry on overflow.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let expires_at = Instant::now() + self.ttl;
        let existed = inner
            .map
            .insert(key.clone(), Entry { value, expires_at })
            .is_some();
        if existed {
            touch(&mut inner.order, &key);
        } else {
            inner.order.push_back(key);
        }
        while inner.map.len() > self.max_size {
            let Some(lru) = inner.order.pop_front() else {
                break;
            };
            inner.map.remove(&lru);
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let total = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.map.len(),
            max_size: self.max_size,
            hit_rate: if total == 0 {
                0.0
            } else {
                inner.hits as f64 / total as f64
            },
        }
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let before = inner.map.len();
        inner.map.retain(|_, entry| entry.expires_at > now);
        let removed = before - inner.map.len();
        if removed > 0 {
            let map = &inner.map;
            let live: Vec<K> = inner.order.iter().filter(|k| map.contains_key(k)).cloned().collect();
            inner.order = live.into();
        }
        removed
    }
}

/// Move `key` to the most-recently-used end of the recency list.
fn touch<K: Eq + Clone>(order: &mut VecDeque<K>, key: &K) {
    order.retain(|k| k != key);
    order.push_back(key.clone());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max: usize, ttl_ms: u64) -> TtlCache<String, i32> {
        TtlCache::new(max, Duration::from_millis(ttl_ms))
    }

    #[test]
    fn test_insert_and_get() {
        let cache = cache(4, 60_000);
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"missing".to_string()), None);
    }

    #[test]
    fn test_size_never_exceeds_max() {
        let cache = cache(3, 60_000);
        for i in 0..20 {
            cache.insert(format!("k{}", i), i);
            assert!(cache.len() <= 3);
        }
    }

    #[test]
    fn test_lru_eviction_spares_recently_read_key() {
        let cache = cache(3, 60_000);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.insert("c".to_string(), 3);

        // Touch "a" so "b" becomes LRU.
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        cache.insert("d".to_string(), 4);

        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);
        assert_eq!(cache.get(&"d".to_string()), Some(4));
    }

    #[test]
    fn test_expired_entry_is_a_miss_and_removed() {
        let cache = cache(4, 0);
        cache.insert("a".to_string(), 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&"a".to_string()), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_fresh_entry_survives_within_ttl() {
        let cache = cache(4, 60_000);
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn test_reinsert_refreshes_value_and_recency() {
        let cache = cache(2, 60_000);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.insert("a".to_string(), 10);
        cache.insert("c".to_string(), 3);

        // "b" was LRU after "a" refreshed.
        assert_eq!(cache.get(&"a".to_string()), Some(10));
        assert_eq!(cache.get(&"b".to_string()), None);
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let cache = cache(4, 60_000);
        cache.insert("a".to_string(), 1);
        cache.get(&"a".to_string());
        cache.get(&"a".to_string());
        cache.get(&"nope".to_string());

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_clear_resets_counters() {
        let cache = cache(4, 60_000);
        cache.insert("a".to_string(), 1);
        cache.get(&"a".to_string());
        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn test_evict_expired_only_drops_stale() {
        let cache: TtlCache<String, i32> = TtlCache::new(8, Duration::from_millis(20));
        cache.insert("old".to_string(), 1);
        std::thread::sleep(Duration::from_millis(30));
        cache.insert("new".to_string(), 2);

        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"new".to_string()), Some(2));
    }

}
