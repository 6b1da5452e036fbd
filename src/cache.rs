use serde_json::Value;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
}

struct CacheEntry {
    value: Value,
    inserted_at: u64,
    expires_at: Option<f64>,
}

/// Expiring key/value store over simulated time. Expired entries are
/// purged lazily on read; an insert over capacity evicts roughly the
/// oldest tenth by insertion order.
pub struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    capacity: usize,
    insert_counter: u64,
    now: f64,
    stats: CacheStats,
}

impl CacheStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            insert_counter: 0,
            now: 0.0,
            stats: CacheStats::default(),
        }
    }

    /// Advances the cache clock. The runtime calls this once per tick.
    pub fn advance(&mut self, dt: f32) {
        self.now += dt as f64;
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value, ttl_seconds: Option<f64>) {
        let key = key.into();
        // Overwriting an existing key is not growth.
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.insert_counter += 1;
        let entry = CacheEntry {
            value,
            inserted_at: self.insert_counter,
            expires_at: ttl_seconds.map(|ttl| self.now + ttl),
        };
        self.entries.insert(key, entry);
    }

    pub fn get(&mut self, key: &str) -> Option<Value> {
        if self.purge_if_expired(key) {
            self.stats.misses += 1;
            return None;
        }
        match self.entries.get(key) {
            Some(entry) => {
                self.stats.hits += 1;
                Some(entry.value.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub fn has(&mut self, key: &str) -> bool {
        !self.purge_if_expired(key) && self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn purge_if_expired(&mut self, key: &str) -> bool {
        let expired = self
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|deadline| self.now >= deadline);
        if expired {
            self.entries.remove(key);
            self.stats.expirations += 1;
        }
        expired
    }

    fn evict_oldest(&mut self) {
        // Expired entries go first; they were dead weight anyway.
        let now = self.now;
        let before = self.entries.len();
        self.entries.retain(|_, entry| match entry.expires_at {
            Some(deadline) => now < deadline,
            None => true,
        });
        self.stats.expirations += (before - self.entries.len()) as u64;
        if self.entries.len() < self.capacity {
            return;
        }

        let evict_count = (self.capacity / 10).max(1);
        let mut order: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.inserted_at, key.clone()))
            .collect();
        order.sort_unstable();
        for (_, key) in order.into_iter().take(evict_count) {
            self.entries.remove(&key);
            self.stats.evictions += 1;
        }
    }
}
