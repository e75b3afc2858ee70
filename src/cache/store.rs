//! TTL key-value storage for cached responses.
//!
//! The result cache only needs opaque bytes with an expiry, so the backend is
//! a narrow trait. [`MemoryStore`] is the in-process implementation.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use bytes::Bytes;
use lru::LruCache;

use super::config::CacheConfig;
use super::error::StoreError;
use super::lock::{read, write};

const SOURCE: &str = "cache::store";

/// Key-value store whose entries expire after a per-entry TTL.
pub trait TtlStore: Send + Sync {
    /// Live value for `key`, `None` when absent or expired.
    fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Returns the key evicted to make room, if any.
    fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<Option<String>, StoreError>;

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        self.get(key).map(|value| value.is_some())
    }

    /// Returns whether a live entry was removed. Absent keys are not an error.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Remove every entry whose key starts with `prefix`; returns the count.
    fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError>;
}

struct Slot {
    value: Bytes,
    expires_at: Instant,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// LRU-bounded in-memory TTL store.
pub struct MemoryStore {
    entries: RwLock<LruCache<String, Slot>>,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.max_entries_non_zero())),
        }
    }

    /// Number of stored entries, expired ones included until touched.
    pub fn len(&self) -> usize {
        read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TtlStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let now = Instant::now();
        let mut entries = write(&self.entries, SOURCE, "get");
        match entries.get(key) {
            Some(slot) if slot.is_live(now) => Ok(Some(slot.value.clone())),
            Some(_) => {
                entries.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<Option<String>, StoreError> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| StoreError::Unavailable(format!("ttl {ttl:?} overflows")))?;
        let evicted = write(&self.entries, SOURCE, "set")
            .push(key.to_string(), Slot { value, expires_at })
            .map(|(evicted, _)| evicted)
            .filter(|evicted| evicted != key);
        Ok(evicted)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let removed = write(&self.entries, SOURCE, "delete").pop(key);
        Ok(removed.is_some_and(|slot| slot.is_live(now)))
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let mut entries = write(&self.entries, SOURCE, "delete_prefix");
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn set_get_delete() {
        let store = MemoryStore::new(&CacheConfig::default());

        assert!(store.get("a").expect("get").is_none());
        store.set("a", Bytes::from("one"), MINUTE).expect("set");
        assert_eq!(store.get("a").expect("get"), Some(Bytes::from("one")));

        assert!(store.delete("a").expect("delete"));
        assert!(!store.delete("a").expect("second delete is a no-op"));
        assert!(store.get("a").expect("get").is_none());
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let store = MemoryStore::new(&CacheConfig::default());
        store.set("a", Bytes::from("one"), Duration::ZERO).expect("set");

        assert!(store.get("a").expect("get").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn delete_prefix_keeps_other_keys() {
        let store = MemoryStore::new(&CacheConfig::default());
        store.set("gql_cache_1", Bytes::new(), MINUTE).expect("set");
        store.set("gql_cache_2", Bytes::new(), MINUTE).expect("set");
        store.set("other", Bytes::new(), MINUTE).expect("set");

        assert_eq!(store.delete_prefix("gql_cache_").expect("purge"), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get("other").expect("get").is_some());
    }

    #[test]
    fn lru_eviction() {
        let config = CacheConfig {
            max_entries: 2,
            ..Default::default()
        };
        let store = MemoryStore::new(&config);

        assert_eq!(store.set("a", Bytes::new(), MINUTE).expect("set"), None);
        assert_eq!(store.set("b", Bytes::new(), MINUTE).expect("set"), None);
        assert_eq!(
            store.set("c", Bytes::new(), MINUTE).expect("set"),
            Some("a".to_string())
        );
        // replacing a live key evicts nothing
        assert_eq!(store.set("c", Bytes::from("2"), MINUTE).expect("set"), None);

        assert!(!store.contains("a").expect("contains"));
        assert!(store.get("b").expect("get").is_some());
        assert!(store.get("c").expect("get").is_some());
    }

    #[test]
    fn recovers_from_poisoned_lock() {
        let store = MemoryStore::new(&CacheConfig::default());

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store.entries.write().expect("lock should be acquired");
            panic!("poison store lock");
        }));

        store.set("a", Bytes::from("one"), MINUTE).expect("set");
        assert!(store.get("a").expect("get").is_some());
    }
}
