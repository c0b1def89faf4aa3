//! Bounded in-memory result cache with optional time-based expiry.
//!
//! One eviction policy everywhere: when full, `put` removes the globally
//! oldest entry. Reads never refresh an entry's age, so insertion order is
//! creation order and eviction stays O(1) amortized. Values are returned
//! by clone; the map keeps exclusive ownership of what it stores.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

struct Entry<V> {
    value: V,
    created_at: Instant,
    seq: u64,
}

/// Cache counters, exposed by the `/cache/stats` endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub ttl_seconds: Option<u64>,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// Capacity-bounded map with optional TTL.
///
/// Not internally synchronized; wrap in [`SharedCache`] when handlers on
/// different tasks share one instance.
pub struct TtlCache<V> {
    entries: HashMap<String, Entry<V>>,
    // Insertion order. Stale pairs (expired or re-inserted keys) are
    // skipped during eviction by comparing sequence numbers.
    order: VecDeque<(String, u64)>,
    capacity: usize,
    ttl: Option<Duration>,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        assert!(capacity > 0, "cache capacity must be non-zero");
        Self {
            entries: HashMap::with_capacity(capacity.min(1024)),
            order: VecDeque::new(),
            capacity,
            ttl,
            next_seq: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    /// Look up a key. An entry older than the TTL counts as a miss and is
    /// removed on the spot.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let expired = match self.entries.get(key) {
            None => {
                self.misses += 1;
                return None;
            }
            Some(entry) => self
                .ttl
                .map_or(false, |ttl| entry.created_at.elapsed() >= ttl),
        };
        if expired {
            self.entries.remove(key);
            self.expirations += 1;
            self.misses += 1;
            return None;
        }
        self.hits += 1;
        self.entries.get(key).map(|e| e.value.clone())
    }

    /// Insert a value, evicting the oldest entry first when at capacity.
    /// Re-inserting an existing key refreshes its value and age.
    pub fn put(&mut self, key: &str, value: V) {
        self.next_seq += 1;
        let seq = self.next_seq;

        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                created_at: Instant::now(),
                seq,
            },
        );
        self.order.push_back((key.to_string(), seq));
    }

    fn evict_oldest(&mut self) {
        while let Some((key, seq)) = self.order.pop_front() {
            // A mismatched sequence number means the key was re-inserted
            // (or already expired away); this pair is stale.
            let live = self.entries.get(&key).map(|e| e.seq) == Some(seq);
            if live {
                self.entries.remove(&key);
                self.evictions += 1;
                return;
            }
        }
    }

    /// Drop every entry, returning how many were held.
    pub fn clear(&mut self) -> usize {
        let previous = self.entries.len();
        self.entries.clear();
        self.order.clear();
        previous
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            ttl_seconds: self.ttl.map(|d| d.as_secs()),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expirations: self.expirations,
        }
    }
}

/// A [`TtlCache`] owning its lock, shared across handler tasks.
pub struct SharedCache<V> {
    inner: Arc<Mutex<TtlCache<V>>>,
}

impl<V> Clone for SharedCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone> SharedCache<V> {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TtlCache::new(capacity, ttl))),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.lock().unwrap().get(key)
    }

    pub fn put(&self, key: &str, value: V) {
        self.inner.lock().unwrap().put(key, value);
    }

    pub fn clear(&self) -> usize {
        self.inner.lock().unwrap().clear()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().unwrap().stats()
    }
}
