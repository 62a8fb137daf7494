//! Bounded, expiring key/value cache.
//!
//! Replaces ad-hoc global blob caches: a `TtlCache` is owned by exactly one
//! component and is invalidated through `invalidate` or `clear` only.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    /// Insertion order, oldest first.
    order: VecDeque<K>,
    capacity: usize,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&mut self, key: &K, now: Instant) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => now.duration_since(entry.inserted_at) >= self.ttl,
            None => return None,
        };
        if expired {
            self.invalidate(key);
            return None;
        }
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    fn insert_at(&mut self, key: K, value: V, now: Instant) {
        self.entries.remove(&key);
        self.order.retain(|k| k != &key);
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
            },
        );
    }

    /// Returns true when an entry was present.
    pub fn invalidate(&mut self, key: &K) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.order.retain(|k| k != key);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut cache = TtlCache::new(4, Duration::from_secs(60));
        cache.insert(1_i64, "avatar-1".to_string());
        assert_eq!(cache.get(&1), Some("avatar-1".to_string()));
        assert_eq!(cache.get(&2), None);
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let mut cache = TtlCache::new(4, Duration::from_secs(10));
        let start = Instant::now();
        cache.insert_at(1_i64, 10_u8, start);

        assert_eq!(cache.get_at(&1, start + Duration::from_secs(9)), Some(10));
        assert_eq!(cache.get_at(&1, start + Duration::from_secs(10)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut cache = TtlCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn test_reinsert_refreshes_order() {
        let mut cache = TtlCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        cache.insert("c", 3);

        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let mut cache = TtlCache::new(4, Duration::from_secs(60));
        cache.insert(1, "x");
        cache.insert(2, "y");

        assert!(cache.invalidate(&1));
        assert!(!cache.invalidate(&1));
        assert_eq!(cache.get(&1), None);

        cache.clear();
        assert!(cache.is_empty());
    }
}
