//! Fallback Store Module
//!
//! In-process TTL map that backs every write and answers reads whenever the
//! remote backend cannot.

use std::collections::HashMap;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{CacheEntry, KeyPattern};
use crate::config::FallbackConfig;

// == Fallback Store ==
/// Key to serialized payload map with lazy expiry and size-triggered sweeps.
///
/// Expired entries are reported as absent on read but only removed by a
/// sweep. Eviction beyond the expired set is expiry-ascending, not LRU.
#[derive(Debug)]
pub struct FallbackStore {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// Size above which `set` triggers a sweep
    max_entries: usize,
    /// Size a sweep brings the store back to
    target_entries: usize,
}

impl FallbackStore {
    // == Constructor ==
    /// Creates an empty store with the given thresholds.
    pub fn new(max_entries: usize, target_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
            target_entries: target_entries.min(max_entries),
        }
    }

    /// Creates an empty store from configuration.
    pub fn from_config(config: &FallbackConfig) -> Self {
        Self::new(config.max_entries, config.target_entries)
    }

    // == Set ==
    /// Stores a payload for `ttl_seconds`, overwriting any previous value.
    ///
    /// Returns the number of entries removed by a triggered sweep.
    pub fn set(&mut self, key: String, value: String, ttl_seconds: u64) -> usize {
        self.entries.insert(key, CacheEntry::new(value, ttl_seconds));
        self.enforce_capacity()
    }

    // == Get ==
    /// Returns the payload if present and not expired.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.as_str())
    }

    // == Delete ==
    /// Removes an entry. Returns whether a live or expired entry existed.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    // == Pattern Removal ==
    /// Removes every key matching `pattern`, returning how many were removed.
    pub fn remove_matching(&mut self, pattern: &KeyPattern) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !pattern.matches(key));
        before - self.entries.len()
    }

    // == Cleanup Expired ==
    /// Removes all expired entries, returning how many were removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = current_timestamp_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        before - self.entries.len()
    }

    // == Capacity ==
    /// Runs a sweep if the store is above `max_entries`: expired entries go
    /// first, then the soonest-to-expire until at `target_entries`.
    pub fn enforce_capacity(&mut self) -> usize {
        if self.entries.len() <= self.max_entries {
            return 0;
        }

        let mut removed = self.cleanup_expired();

        if self.entries.len() > self.target_entries {
            let excess = self.entries.len() - self.target_entries;
            let mut by_expiry: Vec<(u64, String)> = self
                .entries
                .iter()
                .map(|(key, entry)| (entry.expires_at, key.clone()))
                .collect();
            by_expiry.select_nth_unstable(excess - 1);

            for (_, key) in by_expiry.into_iter().take(excess) {
                self.entries.remove(&key);
            }
            removed += excess;
        }

        removed
    }

    // == Length ==
    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FallbackStore {
    fn default() -> Self {
        Self::from_config(&FallbackConfig::default())
    }
}
