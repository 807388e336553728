//! Sharded LRU cache.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Number of independent shards; reduces lock contention.
const NUM_SHARDS: usize = 16;

/// Statistics for cache operations.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: AtomicU64,
    /// Number of cache misses.
    pub misses: AtomicU64,
    /// Number of insertions.
    pub inserts: AtomicU64,
    /// Number of evictions.
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Get the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Entry in a shard's intrusive LRU list. Links are slab indices.
struct Entry<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// One shard: a hash map into a slab of doubly-linked entries.
struct Shard<K, V> {
    capacity: usize,
    map: HashMap<K, usize>,
    slab: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used.
    tail: Option<usize>,
}

impl<K: Hash + Eq + Clone, V: Clone> Shard<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            slab: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    fn get(&mut self, key: &K) -> Option<V> {
        let idx = *self.map.get(key)?;
        self.touch(idx);
        self.slab[idx].as_ref().map(|e| e.value.clone())
    }

    /// Insert a value; returns true if an entry was evicted.
    fn insert(&mut self, key: K, value: V) -> bool {
        if let Some(&idx) = self.map.get(&key) {
            if let Some(entry) = self.slab[idx].as_mut() {
                entry.value = value;
            }
            self.touch(idx);
            return false;
        }

        let evicted = if self.map.len() >= self.capacity {
            self.evict_tail();
            true
        } else {
            false
        };

        let idx = match self.free.pop() {
            Some(idx) => idx,
            None => {
                self.slab.push(None);
                self.slab.len() - 1
            }
        };
        self.slab[idx] = Some(Entry {
            key: key.clone(),
            value,
            prev: None,
            next: self.head,
        });
        if let Some(head) = self.head {
            if let Some(entry) = self.slab[head].as_mut() {
                entry.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
        self.map.insert(key, idx);
        evicted
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn clear(&mut self) {
        self.map.clear();
        self.slab.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Move an entry to the head of the LRU list.
    fn touch(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        if let Some(entry) = self.slab[idx].as_mut() {
            entry.prev = None;
            entry.next = self.head;
        }
        if let Some(head) = self.head {
            if let Some(entry) = self.slab[head].as_mut() {
                entry.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn evict_tail(&mut self) {
        if let Some(tail) = self.tail {
            if let Some(key) = self.slab[tail].as_ref().map(|e| e.key.clone()) {
                self.map.remove(&key);
            }
            self.unlink(tail);
            self.slab[tail] = None;
            self.free.push(tail);
        }
    }

    /// Detach an entry from the list without freeing its slot.
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.slab[idx].as_ref() {
            Some(entry) => (entry.prev, entry.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(entry) = self.slab[p].as_mut() {
                    entry.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(entry) = self.slab[n].as_mut() {
                    entry.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }
}

/// A sharded LRU cache safe for concurrent access.
///
/// Capacity is split evenly across the shards, so the cache may hold
/// slightly more than the requested total when keys hash unevenly.
pub struct LruCache<K, V> {
    shards: Vec<Mutex<Shard<K, V>>>,
    stats: Arc<CacheStats>,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    /// Create a cache holding up to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let per_shard = (capacity + NUM_SHARDS - 1) / NUM_SHARDS;
        let shards = (0..NUM_SHARDS)
            .map(|_| Mutex::new(Shard::new(per_shard.max(1))))
            .collect();
        Self {
            shards,
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Get a value from the cache.
    pub fn get(&self, key: &K) -> Option<V> {
        let result = self.shard(key).lock().get(key);
        if result.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Insert a value. Returns true if an entry was evicted.
    pub fn insert(&self, key: K, value: V) -> bool {
        let evicted = self.shard(&key).lock().insert(key, value);
        self.stats.inserts.fetch_add(1, Ordering::Relaxed);
        if evicted {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Total number of entries across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn purge(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    /// Get the shared statistics handle.
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    fn shard(&self, key: &K) -> &Mutex<Shard<K, V>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % NUM_SHARDS]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_and_insert() {
        let cache: LruCache<u32, String> = LruCache::new(16);
        cache.insert(1, "one".into());
        cache.insert(2, "two".into());

        assert_eq!(cache.get(&1), Some("one".into()));
        assert_eq!(cache.get(&2), Some("two".into()));
        assert_eq!(cache.get(&3), None);
    }

    #[test]
    fn test_update_existing_key() {
        let cache: LruCache<u32, u32> = LruCache::new(16);
        cache.insert(7, 1);
        cache.insert(7, 2);
        assert_eq!(cache.get(&7), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_shard_eviction_order() {
        let mut shard: Shard<u32, u32> = Shard::new(3);
        shard.insert(1, 10);
        shard.insert(2, 20);
        shard.insert(3, 30);

        // Touch 1 so 2 becomes the LRU entry.
        shard.get(&1);
        assert!(shard.insert(4, 40));

        assert_eq!(shard.get(&1), Some(10));
        assert_eq!(shard.get(&2), None);
        assert_eq!(shard.get(&3), Some(30));
        assert_eq!(shard.get(&4), Some(40));
    }

    #[test]
    fn test_purge() {
        let cache: LruCache<u32, u32> = LruCache::new(16);
        cache.insert(1, 1);
        cache.insert(2, 2);
        assert!(!cache.is_empty());
        cache.purge();
        assert!(cache.is_empty());
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn test_stats() {
        let cache: LruCache<u32, u32> = LruCache::new(16);
        cache.insert(1, 1);
        cache.get(&1);
        cache.get(&2);

        let stats = cache.stats();
        assert_eq!(stats.hits.load(Ordering::Relaxed), 1);
        assert_eq!(stats.misses.load(Ordering::Relaxed), 1);
        assert_eq!(stats.inserts.load(Ordering::Relaxed), 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }
}
