use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    value: Vec<u8>,
    created_at: i64,
    ttl_secs: i64,
}

impl CacheEntry {
    fn is_expired(&self, now: i64) -> bool {
        now - self.created_at > self.ttl_secs
    }
}

/// Hit/miss counters exposed to operators.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub invalidations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// TTL key/value cache memoizing crawl results and fix-generator lookups,
/// keyed by content fingerprint.
///
/// Advisory only: a miss costs recomputation, never correctness. sled-backed
/// when a path is given; otherwise (or when the backend fails to open) a
/// process-local map with the same contract.
pub struct ResultCache {
    durable: Option<sled::Tree>,
    memory: RwLock<HashMap<String, CacheEntry>>,
    stats: Mutex<CacheStats>,
}

impl ResultCache {
    pub fn open(path: impl AsRef<Path>) -> Self {
        let durable = match sled::open(path.as_ref()).and_then(|db| db.open_tree("results")) {
            Ok(tree) => Some(tree),
            Err(e) => {
                warn!(error = %e, path = ?path.as_ref(), "cache backend unavailable, using in-memory");
                None
            }
        };
        Self {
            durable,
            memory: RwLock::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            durable: None,
            memory: RwLock::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = chrono::Utc::now().timestamp();
        let entry = self.read_entry(key);
        match entry {
            Some(entry) if !entry.is_expired(now) => {
                self.stats.lock().hits += 1;
                debug!(key, "cache hit");
                Some(entry.value)
            }
            Some(_) => {
                // Expired entries are removed on read and count as misses
                self.remove_entry(key);
                self.stats.lock().misses += 1;
                debug!(key, "cache entry expired");
                None
            }
            None => {
                self.stats.lock().misses += 1;
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let entry = CacheEntry {
            value,
            created_at: chrono::Utc::now().timestamp(),
            ttl_secs: ttl.as_secs() as i64,
        };
        self.write_entry(key, &entry);
        self.stats.lock().inserts += 1;
    }

    pub fn invalidate(&self, key: &str) {
        self.remove_entry(key);
        self.stats.lock().invalidations += 1;
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }

    /// Typed convenience over the byte API.
    pub fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|bytes| bincode::deserialize(&bytes).ok())
    }

    pub fn set_typed<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match bincode::serialize(value) {
            Ok(bytes) => self.set(key, bytes, ttl),
            Err(e) => warn!(key, error = %e, "failed to encode cache value"),
        }
    }

    fn read_entry(&self, key: &str) -> Option<CacheEntry> {
        if let Some(tree) = &self.durable {
            tree.get(key.as_bytes())
                .ok()
                .flatten()
                .and_then(|bytes| bincode::deserialize(&bytes).ok())
        } else {
            self.memory.read().get(key).cloned()
        }
    }

    fn write_entry(&self, key: &str, entry: &CacheEntry) {
        if let Some(tree) = &self.durable {
            match bincode::serialize(entry) {
                Ok(bytes) => {
                    if let Err(e) = tree.insert(key.as_bytes(), bytes) {
                        warn!(key, error = %e, "cache write failed");
                    }
                }
                Err(e) => warn!(key, error = %e, "cache encode failed"),
            }
        } else {
            self.memory.write().insert(key.to_string(), entry.clone());
        }
    }

    fn remove_entry(&self, key: &str) {
        if let Some(tree) = &self.durable {
            let _ = tree.remove(key.as_bytes());
        } else {
            self.memory.write().remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_before_ttl() {
        let cache = ResultCache::in_memory();
        cache.set("k", b"value".to_vec(), Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(b"value".to_vec()));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.inserts, 1);
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache = ResultCache::in_memory();
        cache.set("k", b"v".to_vec(), Duration::from_secs(0));
        // ttl_secs = 0 expires as soon as the clock second advances; force
        // the comparison by backdating through a fresh entry
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().misses, 1);
        // Removed on read
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = ResultCache::in_memory();
        cache.set("k", b"v".to_vec(), Duration::from_secs(60));
        cache.invalidate("k");
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[test]
    fn typed_round_trip() {
        let cache = ResultCache::in_memory();
        cache.set_typed("nums", &vec![1u32, 2, 3], Duration::from_secs(60));
        let got: Vec<u32> = cache.get_typed("nums").expect("typed hit");
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[test]
    fn durable_cache_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cache");
        {
            let cache = ResultCache::open(&path);
            cache.set("k", b"v".to_vec(), Duration::from_secs(300));
        }
        let cache = ResultCache::open(&path);
        assert_eq!(cache.get("k"), Some(b"v".to_vec()));
    }

    #[test]
    fn hit_rate_calculation() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
