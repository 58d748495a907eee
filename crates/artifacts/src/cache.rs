//! Bounded in-memory cache for compressed artifact blobs.
//!
//! Fronts the durable store on the download path. Reads use `peek` so a hit
//! does not refresh recency; once at capacity the oldest-inserted entry is
//! evicted first. Safe for concurrent request handlers via an internal lock.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use tracing::debug;

/// Cache key: `{identifier}-{decoded_sha256}`.
pub fn cache_key(identifier: &str, sha256: &str) -> String {
    format!("{identifier}-{sha256}")
}

pub struct ArtifactCache {
    inner: Mutex<LruCache<String, Vec<u8>>>,
}

impl ArtifactCache {
    /// Create a cache bounded to `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let cache = self.inner.lock().expect("cache lock poisoned");
        cache.peek(key).cloned()
    }

    pub fn set(&self, key: String, payload: Vec<u8>) {
        let mut cache = self.inner.lock().expect("cache lock poisoned");
        // push also hands back the old pair when the key already existed;
        // only a different key means something was actually evicted.
        if let Some((evicted, _)) = cache.push(key.clone(), payload) {
            if evicted != key {
                debug!(key = %evicted, "evicted cached artifact");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_returns_payload() {
        let cache = ArtifactCache::new(3);
        cache.set("a-1".to_string(), vec![1, 2, 3]);
        assert_eq!(cache.get("a-1"), Some(vec![1, 2, 3]));
    }

    #[test]
    fn miss_returns_none() {
        let cache = ArtifactCache::new(3);
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn overwriting_a_key_evicts_nothing() {
        let cache = ArtifactCache::new(2);
        cache.set("k1".to_string(), vec![1]);
        cache.set("k2".to_string(), vec![2]);
        cache.set("k1".to_string(), vec![9]);

        assert_eq!(cache.get("k1"), Some(vec![9]));
        assert_eq!(cache.get("k2"), Some(vec![2]));
    }

    #[test]
    fn oldest_inserted_is_evicted_at_capacity() {
        let cache = ArtifactCache::new(3);
        cache.set("k1".to_string(), vec![1]);
        cache.set("k2".to_string(), vec![2]);
        cache.set("k3".to_string(), vec![3]);
        // Reads must not refresh recency.
        assert!(cache.get("k1").is_some());
        cache.set("k4".to_string(), vec![4]);

        assert_eq!(cache.get("k1"), None);
        assert!(cache.get("k2").is_some());
        assert!(cache.get("k3").is_some());
        assert!(cache.get("k4").is_some());
    }
}
