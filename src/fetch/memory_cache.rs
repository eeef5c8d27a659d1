//! Memory-bounded LRU cache of fetched samples.

use crate::archive::DatasetVersion;
use crate::fetch::key::{CacheKey, FetchedSamples};
use lru::LruCache;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters describing cache behaviour since the engine started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub memory_bytes: u64,
    /// Fetches answered by the on-disk store instead of the archive.
    pub disk_hits: u64,
    /// Individual archive calls, retries included.
    pub upstream_calls: u64,
}

/// LRU over [`FetchedSamples`] with eviction driven by estimated memory use.
///
/// Entries are shared `Arc`s, so evicting one never invalidates a copy a
/// request is still holding.
pub struct SampleCache {
    cache: LruCache<CacheKey, Arc<FetchedSamples>>,
    memory_limit: usize,
    current_memory: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl SampleCache {
    pub fn new(memory_limit: usize) -> Self {
        Self {
            cache: LruCache::unbounded(),
            memory_limit,
            current_memory: 0,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<FetchedSamples>> {
        if let Some(samples) = self.cache.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(Arc::clone(samples))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Lookup that leaves both the LRU order and the hit/miss counters alone.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<FetchedSamples>> {
        self.cache.peek(key).map(Arc::clone)
    }

    /// Inserts an entry, evicting least recently used entries to stay within budget.
    /// An entry larger than the whole budget is not cached at all.
    pub fn insert(&mut self, key: CacheKey, samples: Arc<FetchedSamples>) {
        let size = samples.size_bytes();
        if size > self.memory_limit {
            return;
        }
        if let Some(previous) = self.cache.pop(&key) {
            self.current_memory = self.current_memory.saturating_sub(previous.size_bytes());
        }

        while self.current_memory + size > self.memory_limit && !self.cache.is_empty() {
            if let Some((_, evicted)) = self.cache.pop_lru() {
                self.current_memory = self.current_memory.saturating_sub(evicted.size_bytes());
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.cache.put(key, samples);
        self.current_memory += size;
    }

    /// Drops every entry not belonging to `current`. Returns how many were removed.
    pub fn retain_version(&mut self, current: &DatasetVersion) -> usize {
        let stale: Vec<CacheKey> = self
            .cache
            .iter()
            .filter(|(key, _)| &key.version != current)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            if let Some(samples) = self.cache.pop(key) {
                self.current_memory = self.current_memory.saturating_sub(samples.size_bytes());
            }
        }
        stale.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.cache.len(),
            memory_bytes: self.current_memory as u64,
            ..CacheStats::default()
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.current_memory = 0;
    }

    pub fn memory_usage(&self) -> usize {
        self.current_memory
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::cell::CellId;
    use crate::test_support::sample_run;
    use crate::types::date_key::DateKey;
    use crate::types::variable::Variable;
    use crate::window::{WindowKey, YearRange};

    fn key(version: &str, col: u32) -> CacheKey {
        let years = YearRange::new(2000, 2001).unwrap();
        CacheKey {
            version: DatasetVersion::new(version),
            cell: CellId::new(10, col),
            window: WindowKey::new(DateKey::new(7, 14).unwrap(), 3, years).unwrap(),
            variable: Variable::Temperature,
        }
    }

    fn entry(values: usize) -> Arc<FetchedSamples> {
        let years = YearRange::new(2000, 2001).unwrap();
        Arc::new(FetchedSamples::new(
            sample_run(CellId::new(10, 0), Variable::Temperature, 2000, values, 20.0),
            years,
        ))
    }

    #[test]
    fn test_insert_and_get_returns_same_entry() {
        let mut cache = SampleCache::new(1024 * 1024);
        let samples = entry(7);
        assert!(cache.get(&key("v1", 0)).is_none());
        cache.insert(key("v1", 0), Arc::clone(&samples));
        let hit = cache.get(&key("v1", 0)).unwrap();
        assert!(Arc::ptr_eq(&hit, &samples));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_evicts_least_recently_used_within_budget() {
        let size = entry(7).size_bytes();
        let mut cache = SampleCache::new(size * 3);
        for col in 0..3 {
            cache.insert(key("v1", col), entry(7));
        }
        // Touch the oldest so the second becomes least recently used.
        assert!(cache.get(&key("v1", 0)).is_some());
        cache.insert(key("v1", 3), entry(7));

        assert!(cache.get(&key("v1", 1)).is_none());
        assert!(cache.get(&key("v1", 0)).is_some());
        assert!(cache.get(&key("v1", 3)).is_some());
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.memory_usage() <= size * 3);
    }

    #[test]
    fn test_evicted_entry_stays_valid_for_holders() {
        let size = entry(7).size_bytes();
        let mut cache = SampleCache::new(size);
        cache.insert(key("v1", 0), entry(7));
        let held = cache.get(&key("v1", 0)).unwrap();
        cache.insert(key("v1", 1), entry(7));
        assert!(cache.get(&key("v1", 0)).is_none());
        assert_eq!(held.samples.len(), 7);
    }

    #[test]
    fn test_oversized_entry_is_skipped() {
        let mut cache = SampleCache::new(16);
        cache.insert(key("v1", 0), entry(30));
        assert!(cache.is_empty());
        assert_eq!(cache.memory_usage(), 0);
    }

    #[test]
    fn test_retain_version_drops_stale_entries() {
        let mut cache = SampleCache::new(1024 * 1024);
        cache.insert(key("v1", 0), entry(3));
        cache.insert(key("v1", 1), entry(3));
        cache.insert(key("v2", 0), entry(3));

        let removed = cache.retain_version(&DatasetVersion::new("v2"));
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key("v2", 0)).is_some());
        assert_eq!(cache.memory_usage(), entry(3).size_bytes());
    }
}
