//! Integration tests for the journal-backed disk cache.

use std::fs;

use chrono::{DateTime, Utc};
use pixload_core::{CacheKey, Expiry, Metadata};
use pixload_disk::{DiskCache, DiskCacheError, IMAGE_INDEX, METADATA_INDEX};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn key(name: &str) -> CacheKey {
    CacheKey::new(format!("https://cdn.example.com/{name}"), None)
}

fn metadata(etag: &str) -> Metadata {
    Metadata::new(
        "image/webp",
        DateTime::from_timestamp_millis(1_600_000_000_000),
        Expiry::At(Utc::now() + chrono::Duration::hours(1)),
        etag,
    )
}

fn store(cache: &DiskCache, key: &CacheKey, image: &[u8], metadata: &Metadata) {
    let mut editor = cache.edit(key).unwrap();
    editor.set_image(image).unwrap();
    editor.set_metadata(metadata).unwrap();
    editor.commit().unwrap();
}

#[test]
fn test_store_and_read_back() {
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::builder().path(dir.path()).max_size(1 << 20).open().unwrap();
    let image: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    let meta = metadata("\"v1\"");

    store(&cache, &key("a.webp"), &image, &meta);

    let snapshot = cache.get(&key("a.webp")).unwrap().expect("entry committed");
    assert_eq!(snapshot.read(IMAGE_INDEX).unwrap(), image);
    assert_eq!(snapshot.image().read_all().unwrap().as_ref(), image.as_slice());
    assert_eq!(snapshot.metadata().unwrap(), meta);
    assert_eq!(snapshot.length(IMAGE_INDEX), Some(10_000));
    assert_eq!(
        cache.size(),
        10_000 + snapshot.length(METADATA_INDEX).unwrap()
    );
}

#[test]
fn test_metadata_only_edit_keeps_image() {
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::open(dir.path(), 2, 1 << 20).unwrap();
    store(&cache, &key("a"), b"original image", &metadata("old"));

    let mut editor = cache.edit(&key("a")).unwrap();
    editor.set_metadata(&metadata("new")).unwrap();
    editor.commit().unwrap();

    let snapshot = cache.get(&key("a")).unwrap().unwrap();
    assert_eq!(snapshot.read(IMAGE_INDEX).unwrap(), b"original image");
    assert_eq!(snapshot.metadata().unwrap().etag(), Some("new"));
}

#[test]
fn test_new_entry_requires_every_value() {
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::open(dir.path(), 2, 1 << 20).unwrap();

    let mut editor = cache.edit(&key("a")).unwrap();
    editor.set_metadata(&metadata("")).unwrap();
    let err = editor.commit().unwrap_err();

    assert!(matches!(err, DiskCacheError::MissingValue { index: 0, .. }));
    assert!(cache.get(&key("a")).unwrap().is_none());
    assert!(cache.is_empty());
}

#[test]
fn test_concurrent_edit_is_rejected() {
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::open(dir.path(), 2, 1 << 20).unwrap();

    let first = cache.edit(&key("a")).unwrap();
    let second = cache.edit(&key("a"));
    assert!(matches!(second, Err(DiskCacheError::ConcurrentEdit(_))));

    first.abort().unwrap();
    assert!(cache.edit(&key("a")).is_ok());
}

#[test]
fn test_abort_keeps_committed_values() {
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::open(dir.path(), 2, 1 << 20).unwrap();
    store(&cache, &key("a"), b"v1", &metadata(""));

    let mut editor = cache.edit(&key("a")).unwrap();
    editor.set_image(b"v2").unwrap();
    editor.abort().unwrap();

    let snapshot = cache.get(&key("a")).unwrap().unwrap();
    assert_eq!(snapshot.read(IMAGE_INDEX).unwrap(), b"v1");
}

#[test]
fn test_entries_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let cache = DiskCache::open(dir.path(), 2, 1 << 20).unwrap();
        store(&cache, &key("kept"), b"kept", &metadata("k"));
        store(&cache, &key("removed"), b"removed", &metadata("r"));
        assert!(cache.remove(&key("removed")).unwrap());
        // an edit that never finishes
        let editor = cache.edit(&key("dangling")).unwrap();
        std::mem::forget(editor);
    }

    let cache = DiskCache::open(dir.path(), 2, 1 << 20).unwrap();
    assert_eq!(cache.len(), 1);
    let snapshot = cache.get(&key("kept")).unwrap().unwrap();
    assert_eq!(snapshot.read(IMAGE_INDEX).unwrap(), b"kept");
    assert!(cache.get(&key("removed")).unwrap().is_none());
    assert!(cache.get(&key("dangling")).unwrap().is_none());
}

#[test]
fn test_schema_version_change_discards_entries() {
    let dir = TempDir::new().unwrap();
    {
        let cache = DiskCache::open(dir.path(), 1, 1 << 20).unwrap();
        store(&cache, &key("a"), b"old layout", &metadata(""));
    }

    let cache = DiskCache::open(dir.path(), 2, 1 << 20).unwrap();
    assert!(cache.is_empty());
    assert_eq!(cache.size(), 0);
    assert!(cache.get(&key("a")).unwrap().is_none());

    let hashed = DiskCache::hash_key(&key("a"));
    assert!(!dir.path().join(format!("{hashed}.0")).exists());
}

#[test]
fn test_corrupt_journal_is_discarded() {
    let dir = TempDir::new().unwrap();
    {
        let cache = DiskCache::open(dir.path(), 2, 1 << 20).unwrap();
        store(&cache, &key("a"), b"data", &metadata(""));
    }
    fs::write(dir.path().join("journal"), "garbage\n").unwrap();

    let cache = DiskCache::open(dir.path(), 2, 1 << 20).unwrap();
    assert!(cache.get(&key("a")).unwrap().is_none());
}

#[test]
fn test_least_recently_used_entries_are_trimmed() {
    let dir = TempDir::new().unwrap();
    let meta = metadata("");
    let meta_len = meta.to_bytes().unwrap().len() as u64;
    // room for exactly three entries
    let cache = DiskCache::open(dir.path(), 2, 3 * (100 + meta_len)).unwrap();

    store(&cache, &key("1"), &[1; 100], &meta);
    store(&cache, &key("2"), &[2; 100], &meta);
    store(&cache, &key("3"), &[3; 100], &meta);
    cache.get(&key("1")).unwrap();
    store(&cache, &key("4"), &[4; 100], &meta);

    assert!(cache.size() <= cache.max_size());
    assert!(cache.contains(&key("1")));
    assert!(!cache.contains(&key("2")));
    assert!(cache.contains(&key("3")));
    assert!(cache.contains(&key("4")));
}

#[test]
fn test_missing_path_is_a_config_error() {
    assert!(matches!(
        DiskCache::builder().open(),
        Err(DiskCacheError::InvalidConfig(_))
    ));
}
