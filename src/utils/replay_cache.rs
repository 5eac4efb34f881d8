//! Bounded memory of recently accepted freshness tokens.
//!
//! Backs both freshness policies: the nonce policy keys entries by the 64-bit
//! nonce, the timestamp policy keys them by the packet's authentication tag and
//! drops them once their timestamp falls out of the skew window.
//!
//! The cache never grows past `max_entries`; when full the oldest insertion is
//! evicted first.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use tracing::{debug, instrument, warn};

/// Cache entry for an accepted token
#[derive(Debug, Clone)]
struct CacheEntry {
    /// The freshness stamp carried by the original packet
    stamp: u64,
}

/// Capacity-bounded replay cache with O(1) FIFO eviction
///
/// Uses VecDeque to track insertion order for constant-time removal of oldest
/// entries when the cache reaches capacity.
#[derive(Debug)]
pub struct ReplayCache<K> {
    /// Internal storage mapping keys to entries
    entries: HashMap<K, CacheEntry>,
    /// Insertion order for FIFO eviction
    insertion_order: VecDeque<K>,
    /// Maximum number of entries to prevent unbounded growth
    max_entries: usize,
}

impl<K> ReplayCache<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    /// Create a replay cache holding at most `max_entries` tokens
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Check whether `key` was accepted before, recording it if not.
    ///
    /// Returns true if the token is a replay (already seen), false if new.
    #[instrument(level = "trace", skip(self, key))]
    pub fn is_replay(&mut self, key: K, stamp: u64) -> bool {
        if let Some(entry) = self.entries.get(&key) {
            warn!(?key, stamp, first_stamp = entry.stamp, "Replayed freshness token");
            return true;
        }

        if self.entries.len() >= self.max_entries {
            let to_remove = self.entries.len() - self.max_entries + 1;
            self.remove_oldest_entries(to_remove);
        }

        self.entries.insert(key.clone(), CacheEntry { stamp });
        self.insertion_order.push_back(key);
        false
    }

    /// Drop entries whose stamp is older than `min_stamp`.
    ///
    /// Walks from the oldest insertion and stops at the first entry still
    /// inside the window. Stamps arrive in roughly increasing order, so an
    /// out-of-order older stamp lingers until the entries ahead of it expire.
    pub fn evict_older_than(&mut self, min_stamp: u64) {
        let mut removed = 0usize;
        while let Some(key) = self.insertion_order.front() {
            match self.entries.get(key) {
                Some(entry) if entry.stamp >= min_stamp => break,
                _ => {}
            }
            if let Some(key) = self.insertion_order.pop_front() {
                self.entries.remove(&key);
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "Evicted replay cache entries outside the window");
        }
    }

    /// Remove oldest entries when cache is full using O(1) FIFO eviction.
    #[inline]
    fn remove_oldest_entries(&mut self, count: usize) {
        for _ in 0..count {
            if let Some(key) = self.insertion_order.pop_front() {
                self.entries.remove(&key);
            }
        }

        debug!(count, "Removed oldest replay cache entries due to size limit");
    }

    /// Number of tokens currently remembered
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
