use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    stored_at: Instant,
    value: V,
}

// A zero TTL turns every operation into a no-op.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if self.ttl.is_zero() {
            return None;
        }

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(key) {
            if entry.stored_at.elapsed() < self.ttl {
                return Some(entry.value.clone());
            }
        }
        entries.remove(key);
        None
    }

    pub fn insert(&self, key: K, value: V) {
        if self.ttl.is_zero() {
            return;
        }

        let entry = CacheEntry {
            stored_at: Instant::now(),
            value,
        };
        self.entries.lock().insert(key, entry);
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.lock().remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_values_within_ttl() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("portrait".to_string(), 3);
        assert_eq!(cache.get(&"portrait".to_string()), Some(3));
        assert_eq!(cache.get(&"landscape".to_string()), None);
    }

    #[test]
    fn expired_entries_are_dropped_on_lookup() {
        let cache = TtlCache::new(Duration::from_millis(5));
        cache.insert(1u32, "value");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn zero_ttl_disables_caching() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.insert("key", 1);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get(&"key"), None);
    }

    #[test]
    fn invalidate_and_clear_remove_entries() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.invalidate(&"a");
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
