use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// A last-write-wins TTL cache.
///
/// Owned by the service that needs it and passed in at construction; TTL and
/// capacity policy are fixed once at process start.
#[derive(Debug)]
pub struct TtlCache<K: Eq + Hash, V> {
    entries: DashMap<K, (Instant, V)>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value if present and not expired. Expired entries
    /// are removed on access.
    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.entries.get(key) {
            let (inserted_at, value) = entry.value();
            if inserted_at.elapsed() <= self.ttl {
                return Some(value.clone());
            }
        }
        self.entries.remove(key);
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, (Instant::now(), value));
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
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
    fn returns_fresh_entries() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn expires_stale_entries() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_millis(0));
        cache.insert("a".to_string(), 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn last_write_wins() {
        let cache: TtlCache<&'static str, u32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("k", 1);
        cache.insert("k", 2);
        assert_eq!(cache.get(&"k"), Some(2));
    }
}
