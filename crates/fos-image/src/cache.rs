//! Memory cache with LRU eviction
//!
//! Caches decoded entries by key, bounded by their pixel footprint in KiB.
//! Eviction only demotes an entry: anything still displaying it keeps a
//! usable image.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::{CacheKey, ImageEntry};

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub size_kb: usize,
    pub capacity_kb: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

struct Slot {
    entry: Arc<ImageEntry>,
    size_kb: usize,
    last_access: u64,
}

/// Size-aware LRU cache of decoded entries
pub struct MemoryCache {
    entries: HashMap<CacheKey, Slot>,
    /// Access tick to key, oldest first
    recency: BTreeMap<u64, CacheKey>,
    capacity_kb: usize,
    size_kb: usize,
    access_counter: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Accounted size of an entry: its footprint in KiB, never less than 1
pub fn entry_size_kb(entry: &ImageEntry) -> usize {
    (entry.byte_count() / 1024).max(1)
}

impl MemoryCache {
    /// Create a new cache bounded to `capacity_kb` KiB
    pub fn new(capacity_kb: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            capacity_kb,
            size_kb: 0,
            access_counter: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look up an entry and mark it most recently used.
    /// Entries whose pixels were reused are dropped and reported as misses.
    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<ImageEntry>> {
        let valid = match self.entries.get(key) {
            Some(slot) => slot.entry.is_valid(),
            None => {
                self.misses += 1;
                return None;
            }
        };
        if !valid {
            tracing::debug!("Dropping reused entry {}", key);
            self.remove(key);
            self.misses += 1;
            return None;
        }

        self.access_counter += 1;
        let tick = self.access_counter;
        let slot = self.entries.get_mut(key)?;
        self.recency.remove(&slot.last_access);
        slot.last_access = tick;
        self.recency.insert(tick, key.clone());
        self.hits += 1;
        Some(slot.entry.clone())
    }

    /// Look up without touching recency or statistics
    pub fn peek(&self, key: &CacheKey) -> Option<&Arc<ImageEntry>> {
        self.entries.get(key).map(|slot| &slot.entry)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert an entry, evicting least recently used entries past capacity.
    /// An entry larger than the whole cache is evicted straight away.
    pub fn put(&mut self, key: CacheKey, entry: Arc<ImageEntry>) {
        let size_kb = entry_size_kb(&entry);
        entry.set_cache_state(true);

        if let Some(old) = self.take(&key) {
            if !Arc::ptr_eq(&old.entry, &entry) {
                old.entry.set_cache_state(false);
            }
        }

        self.access_counter += 1;
        let tick = self.access_counter;
        self.size_kb += size_kb;
        self.recency.insert(tick, key.clone());
        self.entries.insert(key, Slot { entry, size_kb, last_access: tick });

        self.trim_to(self.capacity_kb);
    }

    /// Remove an entry, demoting it
    pub fn remove(&mut self, key: &CacheKey) -> Option<Arc<ImageEntry>> {
        let slot = self.take(key)?;
        slot.entry.set_cache_state(false);
        Some(slot.entry)
    }

    /// Evict least recently used entries until at most `capacity_kb` is used
    pub fn trim_to(&mut self, capacity_kb: usize) {
        while self.size_kb > capacity_kb {
            let Some((_, key)) = self.recency.pop_first() else {
                break;
            };
            if let Some(slot) = self.entries.remove(&key) {
                self.size_kb -= slot.size_kb;
                self.evictions += 1;
                tracing::debug!("Evicted {} ({} KiB)", key, slot.size_kb);
                slot.entry.set_cache_state(false);
            }
        }
    }

    /// Change the capacity, evicting as needed
    pub fn resize(&mut self, capacity_kb: usize) {
        self.capacity_kb = capacity_kb;
        self.trim_to(capacity_kb);
    }

    /// Demote and drop every entry
    pub fn clear(&mut self) {
        for (_, slot) in self.entries.drain() {
            slot.entry.set_cache_state(false);
        }
        self.recency.clear();
        self.size_kb = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size_kb(&self) -> usize {
        self.size_kb
    }

    pub fn capacity_kb(&self) -> usize {
        self.capacity_kb
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            size_kb: self.size_kb,
            capacity_kb: self.capacity_kb,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }

    fn take(&mut self, key: &CacheKey) -> Option<Slot> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.last_access);
        self.size_kb -= slot.size_kb;
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DecodedImage, ImageFormat, ImageSource, ReuseMode, ReusePool, SourceKey};
    use fos_gif::Bitmap;

    fn entry(pool: &ReusePool, name: &str, width: u32, height: u32) -> Arc<ImageEntry> {
        let source = ImageSource::resource(name);
        let image = DecodedImage {
            bitmap: Bitmap::new(width, height),
            format: ImageFormat::Gif,
            source_width: width,
            source_height: height,
            sample_size: 1,
            frame_count: Some(1),
            loop_count: None,
            animated: false,
        };
        Arc::new(ImageEntry::new(SourceKey::original(source.clone()).cache_key(), source, image, pool))
    }

    fn pool() -> ReusePool {
        ReusePool::new(ReuseMode::ExactDimensions, 0)
    }

    #[test]
    fn test_put_get() {
        let pool = pool();
        let mut cache = MemoryCache::new(1024);
        let e = entry(&pool, "a", 16, 16);
        cache.put(e.key().clone(), e.clone());

        assert!(e.is_cached());
        let got = cache.get(e.key()).unwrap();
        assert!(Arc::ptr_eq(&got, &e));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.size_kb(), 1);
    }

    #[test]
    fn test_zero_cost_entries_are_charged() {
        let pool = pool();
        let mut cache = MemoryCache::new(2);
        for name in ["a", "b", "c"] {
            let e = entry(&pool, name, 1, 1);
            cache.put(e.key().clone(), e);
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.size_kb(), 2);
    }

    #[test]
    fn test_strict_lru_order() {
        let pool = pool();
        let mut cache = MemoryCache::new(2);
        let a = entry(&pool, "a", 1, 1);
        let b = entry(&pool, "b", 1, 1);
        let c = entry(&pool, "c", 1, 1);
        cache.put(a.key().clone(), a.clone());
        cache.put(b.key().clone(), b.clone());
        cache.get(a.key());
        cache.put(c.key().clone(), c.clone());

        assert!(cache.contains(a.key()));
        assert!(!cache.contains(b.key()));
        assert!(!b.is_cached());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_size_accounting_in_kib() {
        let pool = pool();
        let mut cache = MemoryCache::new(100);
        // 64x64 ARGB = 16 KiB
        let e = entry(&pool, "big", 64, 64);
        cache.put(e.key().clone(), e.clone());
        assert_eq!(cache.size_kb(), 16);
        cache.remove(e.key());
        assert_eq!(cache.size_kb(), 0);
        assert!(!e.is_cached());
    }

    #[test]
    fn test_oversized_entry_not_kept() {
        let pool = pool();
        let mut cache = MemoryCache::new(8);
        let e = entry(&pool, "big", 64, 64);
        cache.put(e.key().clone(), e.clone());
        assert!(cache.is_empty());
        assert!(!e.is_cached());
        assert!(e.is_valid());
    }

    #[test]
    fn test_replacing_key_demotes_old() {
        let pool = pool();
        let mut cache = MemoryCache::new(64);
        let old = entry(&pool, "a", 2, 2);
        let new = entry(&pool, "a", 2, 2);
        cache.put(old.key().clone(), old.clone());
        cache.put(new.key().clone(), new.clone());
        assert!(!old.is_cached());
        assert!(new.is_cached());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_kb(), 1);

        cache.put(new.key().clone(), new.clone());
        assert!(new.is_cached());
    }

    #[test]
    fn test_eviction_while_displayed_keeps_pixels() {
        let pool = pool();
        let mut cache = MemoryCache::new(1);
        let shown = entry(&pool, "shown", 4, 4);
        shown.set_display_state(true);
        cache.put(shown.key().clone(), shown.clone());
        let other = entry(&pool, "other", 4, 4);
        cache.put(other.key().clone(), other);

        assert!(!shown.is_cached());
        assert!(!shown.is_reuse_eligible());
        assert!(pool.acquire(4, 4).is_none());
        assert!(shown.is_valid());

        shown.set_display_state(false);
        assert!(pool.acquire(4, 4).is_some());
        assert!(!shown.is_valid());
    }

    #[test]
    fn test_reused_entry_is_a_miss() {
        let pool = pool();
        let mut cache = MemoryCache::new(64);
        let e = entry(&pool, "a", 2, 2);
        cache.put(e.key().clone(), e.clone());
        e.set_display_state(true);
        e.set_display_state(false);
        // Still cached, so not offered
        assert!(pool.acquire(2, 2).is_none());

        cache.clear();
        assert!(pool.acquire(2, 2).is_some());
        cache.put(e.key().clone(), e.clone());
        assert!(cache.get(e.key()).is_none());
        assert!(cache.is_empty());
    }
}
