use std::io;
use std::sync::Arc;

use chrono::Utc;
use pixload_core::{
    ByteSource, CacheKey, CodecError, Image, ImageCodec, ImageFormat, Metadata, Request,
};
use pixload_disk::{DiskCache, DiskCacheError, IMAGE_INDEX};
use pixload_memory::MemoryCache;
use tracing::{debug, warn};

use super::{Listener, Loader, LoaderEvent, Manager};
use crate::{WorkerPool, metrics};

/// Quality used when a decoded image has to be encoded for the disk cache.
pub const ENCODE_QUALITY: u8 = 75;

#[derive(Debug, thiserror::Error)]
enum WriteError {
    #[error(transparent)]
    Disk(#[from] DiskCacheError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to encode image: {0}")]
    Encode(#[from] CodecError),
}

/// Serves committed entries from the [`DiskCache`] and writes results from
/// the stages below back into it.
///
/// All disk access runs on the single-worker disk pool. An expired entry is
/// delivered as is and then revalidated in the background with a
/// conditional request. Failing to write the cache never fails the load:
/// the result is delivered uncached instead.
#[derive(Clone)]
pub struct DiskLoader {
    disk: DiskCache,
    pool: WorkerPool,
    codec: Arc<dyn ImageCodec>,
    memory: Arc<MemoryCache>,
}

impl std::fmt::Debug for DiskLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskLoader")
            .field("disk", &self.disk)
            .field("pool", &self.pool.name())
            .finish_non_exhaustive()
    }
}

impl DiskLoader {
    /// Creates the stage. `memory` has its metadata refreshed when a
    /// background revalidation confirms an entry.
    pub fn new(
        disk: DiskCache,
        pool: WorkerPool,
        codec: Arc<dyn ImageCodec>,
        memory: Arc<MemoryCache>,
    ) -> Self {
        Self {
            disk,
            pool,
            codec,
            memory,
        }
    }

    fn run(&self, manager: Manager, request: Request) {
        let key = request.key().clone();
        if !request.flags().is_ignore_cache() {
            match self.lookup(&key) {
                Ok(Some((source, metadata))) => {
                    metrics::record_disk_lookup(true);
                    let expired = metadata.is_expired(Utc::now());
                    debug!(%key, expired, "loaded from disk");
                    manager.deliver_stream(source, metadata.clone());
                    if expired {
                        self.revalidate(&manager, request, metadata);
                    }
                    return;
                }
                Ok(None) => metrics::record_disk_lookup(false),
                Err(error) => {
                    metrics::record_disk_lookup(false);
                    warn!(%key, %error, "dropping unreadable disk cache entry");
                    if let Err(error) = self.disk.remove(&key) {
                        warn!(%key, %error, "failed to remove disk cache entry");
                    }
                }
            }
        }

        if request.flags().is_no_store() {
            manager.next(request);
            return;
        }
        let writer = Arc::new(DiskWriter {
            loader: self.clone(),
            key,
            manager: manager.clone(),
        });
        manager.next_with(request, writer);
    }

    fn lookup(&self, key: &CacheKey) -> Result<Option<(ByteSource, Metadata)>, DiskCacheError> {
        let Some(snapshot) = self.disk.get(key)? else {
            return Ok(None);
        };
        let metadata = snapshot.metadata()?;
        Ok(Some((snapshot.image(), metadata)))
    }

    /// Sends a conditional request down the chain. Its outcome is written
    /// back to disk and only reaches the memory cache, never the callers that
    /// already received the stale copy.
    fn revalidate(&self, manager: &Manager, request: Request, metadata: Metadata) {
        let key = request.key().clone();
        debug!(%key, "revalidating expired disk entry");
        let upward = manager.with_listener(Arc::new(Revalidated {
            memory: self.memory.clone(),
            key: key.clone(),
        }));
        let writer = Arc::new(DiskWriter {
            loader: self.clone(),
            key,
            manager: upward.clone(),
        });
        upward.next_with(request.with_metadata(metadata), writer);
    }

    /// Writes `source` and returns the committed copy, or `None` if the
    /// entry was trimmed right away.
    fn store_stream(
        &self,
        key: &CacheKey,
        source: &ByteSource,
        metadata: &Metadata,
    ) -> Result<Option<ByteSource>, WriteError> {
        let mut editor = self.disk.edit(key)?;
        let mut reader = source.open()?;
        editor.copy_from(IMAGE_INDEX, &mut reader)?;
        editor.set_metadata(metadata)?;
        editor.commit()?;
        Ok(self.disk.get(key)?.map(|snapshot| snapshot.image()))
    }

    fn store_image(
        &self,
        key: &CacheKey,
        image: &Image,
        metadata: &Metadata,
    ) -> Result<(), WriteError> {
        let format = ImageFormat::from_content_type(metadata.content_type());
        let encoded = self.codec.encode(image, format, ENCODE_QUALITY)?;
        let mut editor = self.disk.edit(key)?;
        editor.set_image(&encoded)?;
        editor.set_metadata(&metadata.with_content_type(format.content_type()))?;
        editor.commit()?;
        Ok(())
    }

    fn store_metadata(&self, key: &CacheKey, metadata: &Metadata) -> Result<(), WriteError> {
        let mut editor = self.disk.edit(key)?;
        editor.set_metadata(metadata)?;
        editor.commit()?;
        Ok(())
    }
}

impl Loader for DiskLoader {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn load(&self, manager: Manager, request: Request) {
        let key = request.key().clone();
        let this = self.clone();
        manager
            .clone()
            .spawn(&self.pool, &key, async move { this.run(manager, request) });
    }
}

/// Writes results from the stages below into the disk cache before passing
/// them on.
struct DiskWriter {
    loader: DiskLoader,
    key: CacheKey,
    manager: Manager,
}

impl Listener for DiskWriter {
    fn on_event(&self, event: LoaderEvent) {
        let loader = self.loader.clone();
        let key = self.key.clone();
        let manager = self.manager.clone();
        match event {
            LoaderEvent::Stream { source, metadata } => {
                self.manager.spawn(&self.loader.pool, &self.key, async move {
                    match loader.store_stream(&key, &source, &metadata) {
                        Ok(Some(committed)) => {
                            debug!(%key, bytes = committed.len(), "stored on disk");
                            manager.deliver_stream(committed, metadata);
                        }
                        Ok(None) => {
                            debug!(%key, "entry did not fit the disk cache");
                            manager.deliver_stream(source, metadata);
                        }
                        Err(error) => {
                            warn!(%key, %error, "failed to write disk cache, delivering uncached");
                            manager.deliver_stream(source, metadata);
                        }
                    }
                });
            }
            LoaderEvent::Image { image, metadata } => {
                self.manager.spawn(&self.loader.pool, &self.key, async move {
                    if let Err(error) = loader.store_image(&key, &image, &metadata) {
                        warn!(%key, %error, "failed to write disk cache, delivering uncached");
                    }
                    manager.deliver_image(image, metadata);
                });
            }
            LoaderEvent::NotModified(metadata) => {
                self.manager.spawn(&self.loader.pool, &self.key, async move {
                    match loader.store_metadata(&key, &metadata) {
                        Ok(()) => debug!(%key, "refreshed disk cache metadata"),
                        Err(error) => warn!(%key, %error, "failed to refresh disk cache metadata"),
                    }
                    manager.deliver_not_modified(metadata);
                });
            }
            other => self.manager.deliver(other),
        }
    }
}

/// Final listener of a background revalidation.
struct Revalidated {
    memory: Arc<MemoryCache>,
    key: CacheKey,
}

impl Listener for Revalidated {
    fn on_event(&self, event: LoaderEvent) {
        match event {
            LoaderEvent::NotModified(metadata) => {
                debug!(key = %self.key, "cached copy is still valid");
                self.memory.update_metadata(&self.key, metadata);
            }
            LoaderEvent::Stream { .. } | LoaderEvent::Image { .. } => {
                // The next load picks the new copy up from disk
                debug!(key = %self.key, "revalidation fetched a changed resource");
                self.memory.remove(&self.key);
            }
            LoaderEvent::Error(error) => warn!(key = %self.key, %error, "revalidation failed"),
            LoaderEvent::Progress(_) => {}
        }
    }
}
