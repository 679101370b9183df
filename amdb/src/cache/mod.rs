//! In-memory cache sitting in front of the version manager.
//!
//! Three eviction disciplines are supported — LRU, LFU and FIFO — each
//! optionally bounded by a per-entry TTL. The three are closed over a sealed
//! enum rather than an open `dyn Trait` hierarchy: callers pick a policy by
//! value at construction time and the engine never needs to downcast one
//! back out, so trait-object dispatch would only add an indirection with no
//! matching flexibility requirement.

mod policy;

use std::sync::Mutex;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use policy::{FifoCache, LfuCache, LruCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachePolicyKind {
    Lru,
    Lfu,
    Fifo,
}

enum Backend {
    Lru(LruCache),
    Lfu(LfuCache),
    Fifo(FifoCache),
}

impl Backend {
    fn new(kind: CachePolicyKind, capacity: usize, ttl: Option<Duration>) -> Self {
        match kind {
            CachePolicyKind::Lru => Backend::Lru(LruCache::new(capacity, ttl)),
            CachePolicyKind::Lfu => Backend::Lfu(LfuCache::new(capacity, ttl)),
            CachePolicyKind::Fifo => Backend::Fifo(FifoCache::new(capacity, ttl)),
        }
    }

    fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        match self {
            Backend::Lru(c) => c.get(key),
            Backend::Lfu(c) => c.get(key),
            Backend::Fifo(c) => c.get(key),
        }
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        match self {
            Backend::Lru(c) => c.put(key, value),
            Backend::Lfu(c) => c.put(key, value),
            Backend::Fifo(c) => c.put(key, value),
        }
    }

    fn delete(&mut self, key: &[u8]) -> bool {
        match self {
            Backend::Lru(c) => c.delete(key),
            Backend::Lfu(c) => c.delete(key),
            Backend::Fifo(c) => c.delete(key),
        }
    }

    fn clear(&mut self) {
        match self {
            Backend::Lru(c) => c.clear(),
            Backend::Lfu(c) => c.clear(),
            Backend::Fifo(c) => c.clear(),
        }
    }

    fn size(&self) -> usize {
        match self {
            Backend::Lru(c) => c.size(),
            Backend::Lfu(c) => c.size(),
            Backend::Fifo(c) => c.size(),
        }
    }
}

/// Thread-safe cache front-end. Every operation takes the internal mutex,
/// mirroring the lock-guarded methods the policy was modeled on.
pub struct Cache {
    inner: Mutex<Backend>,
}

impl Cache {
    pub fn new(kind: CachePolicyKind, capacity: usize, ttl: Option<Duration>) -> Self {
        Cache { inner: Mutex::new(Backend::new(kind, capacity, ttl)) }
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().get(key)
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.inner.lock().unwrap().put(key, value)
    }

    pub fn delete(&self, key: &[u8]) -> bool {
        self.inner.lock().unwrap().delete(key)
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear()
    }

    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().size()
    }

    /// Returns the cached value for `key`, or calls `compute` to produce one,
    /// caching and returning it. `compute` returning `None` (key absent from
    /// the source of truth) is not cached, so the next call retries it.
    ///
    /// Holds the cache's lock for the entire get-compute-put sequence, not
    /// just each step individually: two concurrent misses on the same key
    /// must not both run `compute` and both write, so `compute` must not
    /// itself try to access this same `Cache` or it will deadlock.
    pub fn get_or_compute<F>(&self, key: &[u8], compute: F) -> Option<Vec<u8>>
    where
        F: FnOnce() -> Option<Vec<u8>>,
    {
        let mut guard = self.inner.lock().unwrap();
        if let Some(v) = guard.get(key) {
            return Some(v);
        }
        let value = compute()?;
        guard.put(key.to_vec(), value.clone());
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_roundtrips() {
        let cache = Cache::new(CachePolicyKind::Lru, 2, None);
        cache.put(b"a".to_vec(), b"1".to_vec());
        assert_eq!(cache.get(b"a"), Some(b"1".to_vec()));
    }

    #[test]
    fn delete_removes_entry() {
        let cache = Cache::new(CachePolicyKind::Fifo, 2, None);
        cache.put(b"a".to_vec(), b"1".to_vec());
        assert!(cache.delete(b"a"));
        assert_eq!(cache.get(b"a"), None);
    }

    #[test]
    fn get_or_compute_caches_result() {
        let cache = Cache::new(CachePolicyKind::Lfu, 4, None);
        let calls = std::cell::Cell::new(0);
        let v1 = cache.get_or_compute(b"a", || {
            calls.set(calls.get() + 1);
            Some(b"x".to_vec())
        });
        let v2 = cache.get_or_compute(b"a", || {
            calls.set(calls.get() + 1);
            Some(b"y".to_vec())
        });
        assert_eq!(v1, Some(b"x".to_vec()));
        assert_eq!(v2, Some(b"x".to_vec()));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn get_or_compute_is_atomic_under_concurrent_misses() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::{Arc, Barrier};
        use std::thread;

        let cache = Arc::new(Cache::new(CachePolicyKind::Lru, 4, None));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_compute(b"a", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(10));
                        Some(b"x".to_vec())
                    })
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), Some(b"x".to_vec()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_empties_cache() {
        let cache = Cache::new(CachePolicyKind::Lru, 4, None);
        cache.put(b"a".to_vec(), b"1".to_vec());
        cache.clear();
        assert_eq!(cache.size(), 0);
    }
}
