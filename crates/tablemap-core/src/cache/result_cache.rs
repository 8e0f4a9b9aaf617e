//! Time-expiring result cache.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use tracing::trace;

use super::CacheStats;

type Payload = Arc<dyn Any + Send + Sync>;

/// One cached value with its lifetime.
#[derive(Clone)]
pub struct CacheEntry {
    key: String,
    value: Payload,
    /// Wall-clock creation time, for diagnostics.
    created_at: SystemTime,
    /// Monotonic expiry; immune to clock adjustments.
    expires_at: Instant,
}

impl CacheEntry {
    fn new(key: String, value: Payload, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            key,
            value,
            created_at: SystemTime::now(),
            // An overflowing TTL never expires.
            expires_at: now.checked_add(ttl).unwrap_or(now + Duration::from_secs(u32::MAX as u64)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Key/value store with per-entry expiration.
///
/// Expired entries are dropped lazily when read; there is no background
/// sweeper. Concurrent `set` calls on one key are last-write-wins. When a
/// capacity is configured and the cache is full, expired entries are purged
/// first, then the entry closest to expiry is evicted.
pub struct ResultCache {
    entries: DashMap<String, CacheEntry>,
    capacity: Option<usize>,
    stats: CacheStats,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ResultCache {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            stats: CacheStats::default(),
        }
    }

    /// Look up `key`.
    ///
    /// An expired entry is removed and reported as a miss, as is an entry
    /// holding a value of a different type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let found = self.entries.get(key).map(|entry| {
            if entry.is_expired() {
                None
            } else {
                Some(Arc::clone(&entry.value))
            }
        });

        match found {
            Some(Some(value)) => match value.downcast::<T>() {
                Ok(value) => {
                    self.stats.record_hit();
                    trace!(key, "result cache hit");
                    Some(value)
                }
                Err(_) => {
                    self.stats.record_miss();
                    None
                }
            },
            Some(None) => {
                // A concurrent set may have refreshed the entry since the check.
                self.entries.remove_if(key, |_, entry| entry.is_expired());
                self.stats.record_miss();
                trace!(key, "result cache entry expired");
                None
            }
            None => {
                self.stats.record_miss();
                trace!(key, "result cache miss");
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl`, replacing any previous entry.
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T, ttl: Duration) {
        self.set_shared(key, Arc::new(value), ttl);
    }

    /// Store an already shared value.
    pub fn set_shared<T: Any + Send + Sync>(
        &self,
        key: impl Into<String>,
        value: Arc<T>,
        ttl: Duration,
    ) {
        let key = key.into();
        if let Some(capacity) = self.capacity {
            if !self.entries.contains_key(&key) && self.entries.len() >= capacity {
                self.make_room(capacity);
            }
        }
        let entry = CacheEntry::new(key.clone(), value, ttl);
        self.entries.insert(key, entry);
    }

    /// The entry under `key`, expired or not.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    /// Drop the entry under `key`. Returns whether one existed.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn make_room(&self, capacity: usize) {
        let purged = self.purge_expired();
        for _ in 0..purged {
            self.stats.record_eviction();
        }
        if self.entries.len() < capacity {
            return;
        }
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.expires_at)
            .map(|entry| entry.key().to_string());
        if let Some(victim) = victim {
            if self.entries.remove(&victim).is_some() {
                self.stats.record_eviction();
            }
        }
    }
}
