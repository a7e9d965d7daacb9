//! Tests for size-based memory cache eviction.

use std::sync::Arc;

use chrono::Utc;
use pixload_core::{Bitmap, CacheKey, Expiry, Image, Metadata};
use pixload_memory::{CacheStats, MemoryCache, MemoryCacheBuilder};
use pretty_assertions::assert_eq;

/// Decoded image stand-in with a fixed byte size.
#[derive(Debug)]
struct Blob(usize);

impl Bitmap for Blob {
    fn byte_size(&self) -> usize {
        self.0
    }
}

fn make_key(id: u32) -> CacheKey {
    CacheKey::new(format!("https://img.example.com/{id}.png"), None)
}

fn make_image(size: usize) -> Image {
    Arc::new(Blob(size))
}

fn metadata(etag: &str) -> Metadata {
    Metadata::new(
        "image/png",
        None,
        Expiry::At(Utc::now() + chrono::Duration::hours(1)),
        etag,
    )
}

#[test]
fn test_oldest_accessed_entries_are_evicted_first() {
    // 6 * 100 byte budget fits five 99-byte images, the sixth forces eviction
    let cache = MemoryCache::new(600);
    for i in 1..=5 {
        assert!(cache.put(make_key(i), make_image(99), metadata("")));
    }
    assert_eq!(cache.len(), 5);

    // touch 1 so that 2 becomes the least recently used
    assert!(cache.get(&make_key(1)).is_some());

    let mut keep_alive = Vec::new();
    for i in 6..=7 {
        let image = make_image(99);
        keep_alive.push(image.clone());
        cache.put(make_key(i), image, metadata(""));
    }

    assert!(cache.size() <= cache.max_size());
    assert!(cache.peek(&make_key(1)).is_some(), "recently used entry survives");
    assert!(cache.peek(&make_key(2)).is_none(), "oldest entry is evicted");
    assert!(cache.peek(&make_key(7)).is_some());
    assert_eq!(cache.stats().eviction_count, 1);
}

#[test]
fn test_entry_of_a_sixth_of_capacity_is_never_inserted() {
    let cache = MemoryCache::new(600);

    assert!(!cache.put(make_key(1), make_image(100), metadata("")));
    assert!(!cache.put(make_key(2), make_image(1_000), metadata("")));
    assert!(cache.put(make_key(3), make_image(99), metadata("")));

    assert!(cache.peek(&make_key(1)).is_none());
    assert!(cache.peek(&make_key(2)).is_none());
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.stats().put_count, 1);
}

#[test]
fn test_evicted_entry_is_resurrected_while_alive() {
    let cache = MemoryCache::builder(600).label("resurrect").build();
    let image = make_image(50);
    cache.put(make_key(1), image.clone(), metadata("v1"));

    cache.evict_all();
    assert!(cache.is_empty());
    assert_eq!(cache.size(), 0);

    // still referenced by `image`, so the weak side table recovers it
    let entry = cache.get(&make_key(1)).expect("resurrected");
    assert!(Arc::ptr_eq(&entry.image, &image));
    assert_eq!(entry.metadata.etag(), Some("v1"));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.size(), 50);
}

#[test]
fn test_eviction_does_not_keep_images_alive() {
    let cache = MemoryCache::new(600);
    let image = make_image(50);
    let weak = Arc::downgrade(&image);
    cache.put(make_key(1), image, metadata(""));

    cache.trim_to_size(0);

    assert!(weak.upgrade().is_none());
    assert!(cache.get(&make_key(1)).is_none());
}

#[test]
fn test_explicit_remove_is_not_resurrected() {
    let cache = MemoryCache::new(600);
    let image = make_image(50);
    cache.put(make_key(1), image.clone(), metadata(""));

    assert!(cache.remove(&make_key(1)).is_some());
    assert!(cache.get(&make_key(1)).is_none());
    assert_eq!(cache.stats().eviction_count, 0);
}

#[test]
fn test_update_metadata_preserves_image_and_order() {
    let cache = MemoryCache::new(600);
    let first = make_image(99);
    cache.put(make_key(1), first.clone(), metadata("old"));
    for i in 2..=5 {
        cache.put(make_key(i), make_image(99), metadata(""));
    }

    assert!(cache.update_metadata(&make_key(1), metadata("new")));
    assert!(!cache.update_metadata(&make_key(42), metadata("new")));

    let entry = cache.peek(&make_key(1)).unwrap();
    assert!(Arc::ptr_eq(&entry.image, &first));
    assert_eq!(entry.metadata.etag(), Some("new"));

    // updating metadata is not a use: key 1 is still the eviction candidate
    cache.put(make_key(6), make_image(99), metadata(""));
    cache.put(make_key(7), make_image(99), metadata(""));
    assert!(cache.peek(&make_key(1)).is_none());
}

#[test]
fn test_trim_to_size() {
    let cache = MemoryCacheBuilder::new(6_000).build();
    for i in 1..=10 {
        cache.put(make_key(i), make_image(100), metadata(""));
    }
    assert_eq!(cache.size(), 1_000);

    cache.trim_to_size(450);

    assert_eq!(cache.len(), 4);
    assert_eq!(cache.size(), 400);
    assert!(cache.peek(&make_key(10)).is_some());
    assert!(cache.peek(&make_key(6)).is_none());
}

#[test]
fn test_stats_are_cumulative() {
    let cache = MemoryCache::new(600);
    cache.put(make_key(1), make_image(10), metadata(""));
    cache.put(make_key(2), make_image(10), metadata(""));

    cache.get(&make_key(1));
    cache.get(&make_key(1));
    cache.get(&make_key(3));
    cache.peek(&make_key(2));

    assert_eq!(
        cache.stats(),
        CacheStats {
            hit_count: 2,
            miss_count: 1,
            put_count: 2,
            eviction_count: 0,
            entry_count: 2,
        }
    );
}
