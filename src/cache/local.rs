//! In-process cache tier
//!
//! A bounded TTL map that keeps reads available while the external tier is
//! unreachable. Expired entries are never returned; they are purged when read
//! and swept before eviction when the map is full.

use crate::clock::{system_clock, Clock};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Longest TTL the local tier keeps an entry for; longer TTLs are clamped
pub const MAX_LOCAL_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A cached value with its absolute expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Bounded in-process TTL map
#[derive(Debug, Clone)]
pub struct LocalCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl LocalCache {
    pub fn new(max_entries: usize) -> Self {
        Self::with_clock(max_entries, system_clock())
    }

    pub fn with_clock(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_entries: max_entries.max(1),
            clock,
        }
    }

    /// Get a live value, purging the entry if it has expired
    pub fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            // Re-check under the shard lock; a concurrent set may have refreshed it
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
            debug!(key = key, "Local cache entry expired");
        }
        None
    }

    /// Insert or replace a value that expires `ttl` from now
    pub fn set(&self, key: &str, value: &str, ttl: Duration) {
        let now = self.clock.now();
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.make_room(now);
        }

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value: value.to_string(),
                expires_at: expiry(now, ttl),
            },
        );
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    fn make_room(&self, now: Instant) {
        self.entries.retain(|_, entry| !entry.is_expired(now));
        if self.entries.len() < self.max_entries {
            return;
        }

        let soonest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.expires_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = soonest {
            self.entries.remove(&key);
            debug!(key = %key, max_entries = self.max_entries, "Evicted local cache entry");
        }
    }
}

fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl.min(MAX_LOCAL_TTL)).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache_with_clock(max_entries: usize) -> (LocalCache, ManualClock) {
        let clock = ManualClock::new();
        (
            LocalCache::with_clock(max_entries, Arc::new(clock.clone())),
            clock,
        )
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let (cache, clock) = cache_with_clock(10);
        cache.set("k", "v", Duration::from_secs(1));

        assert_eq!(cache.get("k"), Some("v".to_string()));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_full_map_evicts_expired_before_live() {
        let (cache, clock) = cache_with_clock(2);
        cache.set("short", "1", Duration::from_secs(1));
        cache.set("long", "2", Duration::from_secs(60));

        clock.advance(Duration::from_secs(2));
        cache.set("new", "3", Duration::from_secs(60));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("long"), Some("2".to_string()));
        assert_eq!(cache.get("new"), Some("3".to_string()));
    }

    #[test]
    fn test_full_map_evicts_soonest_expiring() {
        let (cache, _clock) = cache_with_clock(2);
        cache.set("a", "1", Duration::from_secs(10));
        cache.set("b", "2", Duration::from_secs(60));
        cache.set("c", "3", Duration::from_secs(60));

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_unbounded_ttl_is_clamped() {
        let (cache, clock) = cache_with_clock(10);
        cache.set("forever", "v", Duration::MAX);

        clock.advance(Duration::from_secs(30 * 24 * 60 * 60));
        assert_eq!(cache.get("forever"), Some("v".to_string()));

        clock.advance(MAX_LOCAL_TTL);
        assert_eq!(cache.get("forever"), None);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let (cache, _clock) = cache_with_clock(1);
        cache.set("a", "1", Duration::from_secs(10));
        cache.set("a", "2", Duration::from_secs(10));

        assert_eq!(cache.get("a"), Some("2".to_string()));
    }
}
