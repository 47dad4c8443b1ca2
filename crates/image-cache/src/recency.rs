//! In-memory recency ordering of cached keys
//!
//! The index only orders keys; the bytes belong to the [`Store`](crate::Store).
//! Capacity is enforced by the cache, which pops victims from here and then
//! deletes their files.

use crate::key::CacheKey;
use lru::LruCache;
use std::time::SystemTime;

/// Keys ordered from least to most recently used, with O(1) touch and evict
pub struct RecencyIndex {
    order: LruCache<CacheKey, ()>,
}

impl RecencyIndex {
    pub fn new() -> Self {
        Self {
            order: LruCache::unbounded(),
        }
    }

    /// Rebuild from a directory listing.
    ///
    /// Oldest modification time becomes least recent. Equal times are broken
    /// by key so that reconstruction is stable within a run.
    pub fn rebuild<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (CacheKey, SystemTime)>,
    {
        let mut entries: Vec<_> = entries.into_iter().collect();
        entries.sort_by(|(key_a, time_a), (key_b, time_b)| {
            time_a.cmp(time_b).then_with(|| key_a.cmp(key_b))
        });

        let mut index = Self::new();
        for (key, _) in entries {
            index.insert_most_recent(key);
        }
        index
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.order.contains(key)
    }

    /// Move `key` to the most recent position. No-op if absent.
    pub fn touch(&mut self, key: &CacheKey) {
        self.order.promote(key);
    }

    /// Add `key` as most recent; touches it if already present.
    pub fn insert_most_recent(&mut self, key: CacheKey) {
        if self.order.contains(&key) {
            self.order.promote(&key);
        } else {
            self.order.put(key, ());
        }
    }

    /// Remove and return the least recently used key
    pub fn evict_least_recent(&mut self) -> Option<CacheKey> {
        self.order.pop_lru().map(|(key, _)| key)
    }

    /// Drop a key regardless of position, returning whether it was present
    pub fn remove(&mut self, key: &CacheKey) -> bool {
        self.order.pop(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }

    /// Keys from least to most recently used
    pub fn iter_lru_order(&self) -> impl Iterator<Item = &CacheKey> {
        self.order.iter().rev().map(|(key, _)| key)
    }
}

impl Default for RecencyIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(name: &str) -> CacheKey {
        CacheKey::for_url(&format!("https://example.com/{}.png", name))
    }

    fn order(index: &RecencyIndex) -> Vec<CacheKey> {
        index.iter_lru_order().cloned().collect()
    }

    #[test]
    fn test_insert_and_evict_in_lru_order() {
        let mut index = RecencyIndex::new();
        index.insert_most_recent(key("a"));
        index.insert_most_recent(key("b"));
        index.insert_most_recent(key("c"));

        assert_eq!(index.len(), 3);
        assert_eq!(index.evict_least_recent(), Some(key("a")));
        assert_eq!(index.evict_least_recent(), Some(key("b")));
        assert_eq!(index.evict_least_recent(), Some(key("c")));
        assert_eq!(index.evict_least_recent(), None);
        assert!(index.is_empty());
    }

    #[test]
    fn test_touch_moves_to_most_recent() {
        let mut index = RecencyIndex::new();
        index.insert_most_recent(key("a"));
        index.insert_most_recent(key("b"));
        index.insert_most_recent(key("c"));

        index.touch(&key("a"));
        assert_eq!(order(&index), vec![key("b"), key("c"), key("a")]);

        // Idempotent
        index.touch(&key("a"));
        assert_eq!(order(&index), vec![key("b"), key("c"), key("a")]);
    }

    #[test]
    fn test_touch_absent_is_noop() {
        let mut index = RecencyIndex::new();
        index.insert_most_recent(key("a"));
        index.touch(&key("missing"));

        assert_eq!(index.len(), 1);
        assert!(!index.contains(&key("missing")));
    }

    #[test]
    fn test_duplicate_insert_is_touch() {
        let mut index = RecencyIndex::new();
        index.insert_most_recent(key("a"));
        index.insert_most_recent(key("b"));
        index.insert_most_recent(key("a"));

        assert_eq!(index.len(), 2);
        assert_eq!(order(&index), vec![key("b"), key("a")]);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut index = RecencyIndex::new();
        index.insert_most_recent(key("a"));
        index.insert_most_recent(key("b"));

        assert!(index.remove(&key("a")));
        assert!(!index.remove(&key("a")));
        assert_eq!(index.len(), 1);

        index.clear();
        assert!(index.is_empty());
        assert!(!index.contains(&key("b")));
    }

    #[test]
    fn test_rebuild_orders_by_mtime() {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let index = RecencyIndex::rebuild(vec![
            (key("newest"), base + Duration::from_secs(20)),
            (key("oldest"), base),
            (key("middle"), base + Duration::from_secs(10)),
        ]);

        assert_eq!(
            order(&index),
            vec![key("oldest"), key("middle"), key("newest")]
        );
    }

    #[test]
    fn test_rebuild_ties_broken_by_key() {
        let now = SystemTime::now();
        let mut keys = vec![key("x"), key("y"), key("z")];
        let index = RecencyIndex::rebuild(keys.iter().rev().map(|k| (k.clone(), now)));

        keys.sort();
        assert_eq!(order(&index), keys);
    }
}
