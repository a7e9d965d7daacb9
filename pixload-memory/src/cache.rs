//! Size-bounded LRU cache of decoded images.

use std::collections::HashMap;
use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use pixload_core::{Bitmap, CacheKey, Image, Metadata, SmolStr};
use tracing::{debug, trace};

use crate::metrics;

/// Largest entry accepted, as a fraction of the total budget.
const MAX_ENTRY_FRACTION: usize = 6;

/// A decoded image together with its freshness metadata.
#[derive(Debug, Clone)]
pub struct CachedImage {
    /// The decoded image.
    pub image: Image,
    /// Metadata the image was loaded with.
    pub metadata: Metadata,
}

/// Cumulative cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache, including resurrected entries.
    pub hit_count: u64,
    /// Lookups that found nothing.
    pub miss_count: u64,
    /// Accepted insertions.
    pub put_count: u64,
    /// Entries dropped to stay within budget or on explicit trims.
    pub eviction_count: u64,
    /// Entries currently held.
    pub entry_count: u64,
}

struct Slot {
    entry: CachedImage,
    size: usize,
}

struct Inner {
    lru: LruCache<CacheKey, Slot>,
    size: usize,
}

struct Evicted {
    image: Weak<dyn Bitmap>,
    metadata: Metadata,
}

/// In-memory LRU cache bounded by the aggregate byte size of its images.
///
/// Entries evicted under pressure are remembered weakly: as long as some
/// other owner keeps the image alive, a later [`get`](Self::get) puts it
/// back without reloading. The cache never keeps evicted images alive
/// itself.
///
/// # Examples
///
/// ```
/// use pixload_memory::MemoryCache;
///
/// let cache = MemoryCache::builder(16 * 1024 * 1024).label("thumbnails").build();
/// assert_eq!(cache.max_size(), 16 * 1024 * 1024);
/// assert!(cache.is_empty());
/// ```
pub struct MemoryCache {
    label: SmolStr,
    max_size: usize,
    inner: Mutex<Inner>,
    evicted: Mutex<HashMap<CacheKey, Evicted>>,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("label", &self.label)
            .field("max_size", &self.max_size)
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

impl MemoryCache {
    /// Creates a cache holding at most `max_size` bytes of decoded images.
    pub fn new(max_size: usize) -> Self {
        Self::builder(max_size).build()
    }

    /// Creates a builder for a cache of `max_size` bytes.
    pub fn builder(max_size: usize) -> crate::builder::MemoryCacheBuilder {
        crate::builder::MemoryCacheBuilder::new(max_size)
    }

    pub(crate) fn from_parts(label: SmolStr, max_size: usize) -> Self {
        Self {
            label,
            max_size,
            inner: Mutex::new(Inner {
                lru: LruCache::unbounded(),
                size: 0,
            }),
            evicted: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns the label used in logs and metrics.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Looks up `key`, marking it most recently used.
    ///
    /// Falls back to the weakly retained evicted entries and re-inserts a
    /// still-alive image found there.
    pub fn get(&self, key: &CacheKey) -> Option<CachedImage> {
        if let Some(slot) = self.inner.lock().lru.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(slot.entry.clone());
        }

        let resurrected = self.evicted.lock().remove(key).and_then(|evicted| {
            evicted.image.upgrade().map(|image| CachedImage {
                image,
                metadata: evicted.metadata,
            })
        });

        match resurrected {
            Some(entry) => {
                trace!(cache = %self.label, %key, "resurrected evicted image");
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.insert(key.clone(), entry.clone());
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Looks up `key` without touching recency or counters.
    pub fn peek(&self, key: &CacheKey) -> Option<CachedImage> {
        self.inner.lock().lru.peek(key).map(|slot| slot.entry.clone())
    }

    /// Inserts an image.
    ///
    /// Images of at least a sixth of the total budget are rejected and
    /// `false` is returned.
    pub fn put(&self, key: CacheKey, image: Image, metadata: Metadata) -> bool {
        let size = image.byte_size();
        if size >= self.max_size / MAX_ENTRY_FRACTION {
            debug!(
                cache = %self.label,
                %key,
                size,
                max_size = self.max_size,
                "image too large for memory cache"
            );
            return false;
        }

        self.puts.fetch_add(1, Ordering::Relaxed);
        self.evicted.lock().remove(&key);
        self.insert(key, CachedImage { image, metadata });
        true
    }

    /// Replaces the metadata of a cached image.
    ///
    /// Recency and the image itself are left untouched. Returns `false` if
    /// the key is not cached.
    pub fn update_metadata(&self, key: &CacheKey, metadata: Metadata) -> bool {
        match self.inner.lock().lru.peek_mut(key) {
            Some(slot) => {
                slot.entry.metadata = metadata;
                true
            }
            None => false,
        }
    }

    /// Removes `key` without remembering it.
    pub fn remove(&self, key: &CacheKey) -> Option<CachedImage> {
        self.evicted.lock().remove(key);
        let removed = {
            let mut inner = self.inner.lock();
            let slot = inner.lru.pop(key)?;
            inner.size -= slot.size;
            slot.entry
        };
        self.publish();
        Some(removed)
    }

    /// Evicts every entry.
    pub fn evict_all(&self) {
        self.trim_to_size(0);
    }

    /// Evicts least recently used entries until at most `max_size` bytes
    /// remain.
    pub fn trim_to_size(&self, max_size: usize) {
        let victims = {
            let mut inner = self.inner.lock();
            Self::trim_locked(&mut inner, max_size)
        };
        self.stash(victims);
        self.publish();
    }

    /// Returns the bytes currently held.
    pub fn size(&self) -> usize {
        self.inner.lock().size
    }

    /// Returns the byte budget.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    /// Returns `true` if the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            put_count: self.puts.load(Ordering::Relaxed),
            eviction_count: self.evictions.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
        }
    }

    fn insert(&self, key: CacheKey, entry: CachedImage) {
        let size = entry.image.byte_size();
        let victims = {
            let mut inner = self.inner.lock();
            if let Some(old) = inner.lru.put(key, Slot { entry, size }) {
                inner.size -= old.size;
            }
            inner.size += size;
            Self::trim_locked(&mut inner, self.max_size)
        };
        self.stash(victims);
        self.publish();
    }

    fn trim_locked(inner: &mut Inner, max_size: usize) -> Vec<(CacheKey, CachedImage)> {
        let mut victims = Vec::new();
        while inner.size > max_size {
            let Some((key, slot)) = inner.lru.pop_lru() else {
                break;
            };
            inner.size -= slot.size;
            victims.push((key, slot.entry));
        }
        victims
    }

    fn stash(&self, victims: Vec<(CacheKey, CachedImage)>) {
        if victims.is_empty() {
            return;
        }
        self.evictions
            .fetch_add(victims.len() as u64, Ordering::Relaxed);

        let mut evicted = self.evicted.lock();
        evicted.retain(|_, e| e.image.strong_count() > 0);
        for (key, entry) in victims {
            trace!(cache = %self.label, %key, "evicted image");
            evicted.insert(
                key,
                Evicted {
                    image: std::sync::Arc::downgrade(&entry.image),
                    metadata: entry.metadata,
                },
            );
        }
    }

    fn publish(&self) {
        let (entries, bytes) = {
            let inner = self.inner.lock();
            (inner.lru.len() as u64, inner.size as u64)
        };
        metrics::record_capacity(&self.label, entries, bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixload_core::Expiry;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Blob(usize);

    impl Bitmap for Blob {
        fn byte_size(&self) -> usize {
            self.0
        }
    }

    fn meta() -> Metadata {
        Metadata::new("image/png", None, Expiry::Never, "")
    }

    #[test]
    fn test_replacing_an_entry_keeps_size_consistent() {
        let cache = MemoryCache::new(600);
        let key = CacheKey::new("https://example.com/a", None);

        assert!(cache.put(key.clone(), Arc::new(Blob(50)), meta()));
        assert!(cache.put(key.clone(), Arc::new(Blob(70)), meta()));

        assert_eq!(cache.size(), 70);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().eviction_count, 0);
    }

    #[test]
    fn test_dead_evicted_entries_are_not_resurrected() {
        let cache = MemoryCache::new(600);
        let key = CacheKey::new("https://example.com/a", None);
        cache.put(key.clone(), Arc::new(Blob(50)), meta());

        cache.evict_all();
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.stats().miss_count, 1);
    }
}
