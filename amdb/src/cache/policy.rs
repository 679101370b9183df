//! Per-policy eviction bookkeeping.
//!
//! Each cache keeps entries in a `HashMap` for O(1) lookup plus a small
//! ordering structure the policy needs (recency list, frequency counter or
//! insertion list). Capacities in this engine are modest enough that the
//! `Vec`-based reordering below stays cheap in practice.

use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    value: Vec<u8>,
    inserted_at: Instant,
    freq: u64,
}

fn expired(inserted_at: Instant, ttl: Option<Duration>) -> bool {
    match ttl {
        Some(d) => inserted_at.elapsed() >= d,
        None => false,
    }
}

pub struct LruCache {
    capacity: usize,
    ttl: Option<Duration>,
    entries: HashMap<Vec<u8>, Entry>,
    /// Most-recently-used at the back.
    order: Vec<Vec<u8>>,
}

impl LruCache {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        LruCache { capacity, ttl, entries: HashMap::new(), order: Vec::new() }
    }

    fn touch(&mut self, key: &[u8]) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
    }

    pub fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let hit = match self.entries.get(key) {
            Some(e) if !expired(e.inserted_at, self.ttl) => Some(e.value.clone()),
            Some(_) => None,
            None => return None,
        };
        if hit.is_none() {
            self.delete(key);
            return None;
        }
        self.touch(key);
        hit
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        if self.entries.contains_key(&key) {
            self.entries.insert(key.clone(), Entry { value, inserted_at: Instant::now(), freq: 0 });
            self.touch(&key);
            return;
        }
        if self.entries.len() >= self.capacity && self.capacity > 0 {
            if !self.order.is_empty() {
                let evict = self.order.remove(0);
                self.entries.remove(&evict);
            }
        }
        if self.capacity == 0 {
            return;
        }
        self.entries.insert(key.clone(), Entry { value, inserted_at: Instant::now(), freq: 0 });
        self.order.push(key);
    }

    pub fn delete(&mut self, key: &[u8]) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            if let Some(pos) = self.order.iter().position(|k| k.as_slice() == key) {
                self.order.remove(pos);
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }
}

pub struct LfuCache {
    capacity: usize,
    ttl: Option<Duration>,
    entries: HashMap<Vec<u8>, Entry>,
    insertion_order: Vec<Vec<u8>>,
}

impl LfuCache {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        LfuCache { capacity, ttl, entries: HashMap::new(), insertion_order: Vec::new() }
    }

    pub fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let expired_now = match self.entries.get(key) {
            Some(e) => expired(e.inserted_at, self.ttl),
            None => return None,
        };
        if expired_now {
            self.delete(key);
            return None;
        }
        let e = self.entries.get_mut(key).unwrap();
        e.freq += 1;
        Some(e.value.clone())
    }

    /// Ties broken by oldest insertion first, via `insertion_order` rather
    /// than `HashMap` iteration order (which is randomized per-process).
    fn evict_least_frequent(&mut self) {
        let victim = self
            .insertion_order
            .iter()
            .filter_map(|k| self.entries.get(k).map(|e| (k.clone(), e.freq)))
            .min_by_key(|(_, freq)| *freq)
            .map(|(k, _)| k);
        if let Some(k) = victim {
            self.delete(&k);
        }
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.contains_key(&key) {
            let e = self.entries.get_mut(&key).unwrap();
            e.value = value;
            e.inserted_at = Instant::now();
            e.freq += 1;
            return;
        }
        if self.entries.len() >= self.capacity {
            self.evict_least_frequent();
        }
        self.entries.insert(key.clone(), Entry { value, inserted_at: Instant::now(), freq: 1 });
        self.insertion_order.push(key);
    }

    pub fn delete(&mut self, key: &[u8]) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            if let Some(pos) = self.insertion_order.iter().position(|k| k.as_slice() == key) {
                self.insertion_order.remove(pos);
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }
}

pub struct FifoCache {
    capacity: usize,
    ttl: Option<Duration>,
    entries: HashMap<Vec<u8>, Entry>,
    order: Vec<Vec<u8>>,
}

impl FifoCache {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        FifoCache { capacity, ttl, entries: HashMap::new(), order: Vec::new() }
    }

    pub fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let expired_now = match self.entries.get(key) {
            Some(e) => expired(e.inserted_at, self.ttl),
            None => return None,
        };
        if expired_now {
            self.delete(key);
            return None;
        }
        self.entries.get(key).map(|e| e.value.clone())
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.contains_key(&key) {
            let e = self.entries.get_mut(&key).unwrap();
            e.value = value;
            e.inserted_at = Instant::now();
            return;
        }
        if self.entries.len() >= self.capacity && !self.order.is_empty() {
            let evict = self.order.remove(0);
            self.entries.remove(&evict);
        }
        self.entries.insert(key.clone(), Entry { value, inserted_at: Instant::now(), freq: 0 });
        self.order.push(key);
    }

    pub fn delete(&mut self, key: &[u8]) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            if let Some(pos) = self.order.iter().position(|k| k.as_slice() == key) {
                self.order.remove(pos);
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn lru_evicts_least_recently_used() {
        let mut c = LruCache::new(2, None);
        c.put(b"a".to_vec(), b"1".to_vec());
        c.put(b"b".to_vec(), b"2".to_vec());
        c.get(b"a");
        c.put(b"c".to_vec(), b"3".to_vec());
        assert_eq!(c.get(b"b"), None);
        assert_eq!(c.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(c.get(b"c"), Some(b"3".to_vec()));
    }

    #[test]
    fn lfu_evicts_least_frequently_used() {
        let mut c = LfuCache::new(2, None);
        c.put(b"a".to_vec(), b"1".to_vec());
        c.put(b"b".to_vec(), b"2".to_vec());
        c.get(b"a");
        c.get(b"a");
        c.put(b"c".to_vec(), b"3".to_vec());
        assert_eq!(c.get(b"b"), None);
        assert_eq!(c.get(b"a"), Some(b"1".to_vec()));
    }

    #[test]
    fn fifo_evicts_in_insertion_order() {
        let mut c = FifoCache::new(2, None);
        c.put(b"a".to_vec(), b"1".to_vec());
        c.put(b"b".to_vec(), b"2".to_vec());
        c.get(b"a");
        c.put(b"c".to_vec(), b"3".to_vec());
        assert_eq!(c.get(b"a"), None);
        assert_eq!(c.get(b"b"), Some(b"2".to_vec()));
    }

    #[test]
    fn ttl_expires_entries() {
        let mut c = LruCache::new(4, Some(Duration::from_millis(10)));
        c.put(b"a".to_vec(), b"1".to_vec());
        sleep(Duration::from_millis(30));
        assert_eq!(c.get(b"a"), None);
    }
}
