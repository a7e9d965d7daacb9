//! Stale disk entries are served first and revalidated in the background.

mod common;

use std::sync::Arc;

use bytes::Bytes;
use chrono::{Duration, Utc};
use common::{Event, MockConnector, Recorder, Route, TestCodec, bytes_of, eventually, next_event};
use pixload::{Expiry, ImageLoader, Metadata, Request};
use pixload_disk::{DEFAULT_APP_VERSION, DiskCache, IMAGE_INDEX};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const URL: &str = "mock://images/cat.png";

fn seed_expired(dir: &TempDir, body: &[u8]) {
    let disk = DiskCache::open(dir.path(), DEFAULT_APP_VERSION, 1 << 20).unwrap();
    let key = Request::new(URL).unwrap().key().clone();
    let metadata = Metadata::new(
        "image/png",
        Some(Utc::now() - Duration::days(2)),
        Expiry::At(Utc::now() - Duration::hours(1)),
        "\"v1\"",
    );
    let mut editor = disk.edit(&key).unwrap();
    editor.set_image(body).unwrap();
    editor.set_metadata(&metadata).unwrap();
    editor.commit().unwrap();
    disk.flush().unwrap();
}

fn loader(dir: &TempDir, connector: &Arc<MockConnector>) -> ImageLoader {
    ImageLoader::builder()
        .codec(Arc::new(TestCodec))
        .disk_cache(dir.path(), 1 << 20)
        .scheme_handler("mock", connector.clone())
        .build()
        .unwrap()
}

fn disk_is_fresh(loader: &ImageLoader, request: &Request) -> bool {
    loader
        .disk_cache()
        .and_then(|disk| disk.get(request.key()).ok().flatten())
        .and_then(|snapshot| snapshot.metadata().ok())
        .is_some_and(|metadata| !metadata.is_expired(Utc::now()))
}

#[tokio::test]
async fn test_not_modified_refreshes_metadata() {
    let dir = TempDir::new().unwrap();
    seed_expired(&dir, b"old");
    let connector = MockConnector::open();
    connector.route("/cat.png", Route::ok(b"new").not_modified());
    let loader = loader(&dir, &connector);
    let request = Request::new(URL).unwrap();
    let (listener, mut events) = Recorder::new();
    let tag = loader.tag();

    assert!(loader.load(tag.tag(), request.clone(), listener).is_none());
    match next_event(&mut events).await {
        Event::Success(Some(delivered), bytes) => {
            assert_eq!(delivered, tag.tag());
            assert_eq!(bytes, Bytes::from_static(b"old"));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    eventually(|| disk_is_fresh(&loader, &request)).await;
    assert_eq!(connector.started(), 1);
    assert_eq!(connector.conditional(), 1);

    let snapshot = loader.disk_cache().unwrap().get(request.key()).unwrap().unwrap();
    assert_eq!(snapshot.read(IMAGE_INDEX).unwrap(), b"old".to_vec());
    assert_eq!(snapshot.metadata().unwrap().etag(), Some("\"v1\""));

    eventually(|| {
        loader
            .memory_cache()
            .peek(request.key())
            .is_some_and(|cached| !cached.metadata.is_expired(Utc::now()))
    })
    .await;
    let cached = loader.memory_cache().peek(request.key()).unwrap();
    assert_eq!(bytes_of(&cached.image), Bytes::from_static(b"old"));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_changed_resource_replaces_disk_entry() {
    let dir = TempDir::new().unwrap();
    seed_expired(&dir, b"old");
    let connector = MockConnector::open();
    connector.route("/cat.png", Route::ok(b"new"));
    let loader = loader(&dir, &connector);
    let request = Request::new(URL).unwrap();

    let image = loader.load_async(request.clone()).await.unwrap();
    assert_eq!(bytes_of(&image), Bytes::from_static(b"old"));

    eventually(|| disk_is_fresh(&loader, &request)).await;
    let snapshot = loader.disk_cache().unwrap().get(request.key()).unwrap().unwrap();
    assert_eq!(snapshot.read(IMAGE_INDEX).unwrap(), b"new".to_vec());

    eventually(|| loader.memory_cache().peek(request.key()).is_none()).await;
    let image = loader.load_async(request).await.unwrap();
    assert_eq!(bytes_of(&image), Bytes::from_static(b"new"));
    assert_eq!(connector.started(), 1);
}

#[tokio::test]
async fn test_fresh_entry_is_not_revalidated() {
    let dir = TempDir::new().unwrap();
    let connector = MockConnector::open();
    connector.route("/cat.png", Route::ok(b"meow"));
    let loader = loader(&dir, &connector);
    let request = Request::new(URL).unwrap();

    loader.load_async(request.clone()).await.unwrap();
    loader.memory_cache().evict_all();
    loader.load_async(request).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(connector.started(), 1);
    assert_eq!(connector.conditional(), 0);
}
