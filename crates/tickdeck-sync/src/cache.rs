/*
[INPUT]:  Keys and fetched payloads with optional per-entry expiry
[OUTPUT]: Fresh cached payloads; stale entries dropped on access
[POS]:    Cache layer - time- and size-bounded LRU for historical data
[UPDATE]: When changing eviction policy, expiry rules or capacity defaults
*/

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 50;
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    payload: V,
    inserted_at: Instant,
    expiry: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) <= self.expiry
    }
}

#[derive(Debug)]
struct CacheState<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<V>>,
    default_expiry: Duration,
}

impl<K: Eq + Hash + Clone, V> CacheState<K, V> {
    /// Drops the entry when it is past its expiry; returns whether it is usable.
    /// Uses `peek`, so recency is left as is.
    fn retain_if_fresh(&mut self, key: &K, now: Instant) -> bool {
        match self.entries.peek(key) {
            Some(entry) if entry.is_fresh(now) => true,
            Some(_) => {
                self.entries.pop(key);
                false
            }
            None => false,
        }
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let stale: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_fresh(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            self.entries.pop(key);
        }
        stale.len()
    }
}

/// Shared, size-bounded LRU store whose entries expire.
///
/// Recency is bumped by `set` and by a successful `get`. Time comes from
/// `tokio::time`, so tests may drive expiry with a paused clock.
#[derive(Debug)]
pub struct HistoricalCache<K: Hash + Eq, V> {
    state: Mutex<CacheState<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> HistoricalCache<K, V> {
    pub fn new(capacity: usize, default_expiry: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                default_expiry,
            }),
        }
    }

    /// Insert or overwrite. A new key at capacity first drops expired
    /// entries, then evicts the least recently used one if still full.
    pub fn set(&self, key: K, value: V, expiry: Option<Duration>) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let expiry = expiry.unwrap_or(state.default_expiry);

        if !state.entries.contains(&key) && state.entries.len() >= state.entries.cap().get() {
            let purged = state.purge_expired(now);
            if purged > 0 {
                debug!(purged, "cache dropped expired entries before insert");
            }
        }

        let entry = CacheEntry {
            payload: value,
            inserted_at: now,
            expiry,
        };
        if let Some((evicted, _)) = state.entries.push(key.clone(), entry) {
            if evicted != key {
                debug!(remaining = state.entries.len(), "cache evicted least recently used entry");
            }
        }
    }

    /// Fresh value for `key`, refreshing its recency. Stale entries are removed.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock();
        if !state.retain_if_fresh(key, Instant::now()) {
            return None;
        }
        state.entries.get(key).map(|entry| entry.payload.clone())
    }

    /// Existence check honoring expiry. Does not touch recency.
    pub fn has(&self, key: &K) -> bool {
        self.state.lock().retain_if_fresh(key, Instant::now())
    }

    pub fn delete(&self, key: &K) -> bool {
        self.state.lock().entries.pop(key).is_some()
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Stored entries, including ones that expired but were not accessed yet
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().entries.cap().get()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for HistoricalCache<K, V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_EXPIRY)
    }
}
