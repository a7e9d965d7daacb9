//! The loader facade.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use pixload_core::{Image, Request};
use pixload_disk::DiskCache;
use pixload_memory::MemoryCache;
use tokio::sync::oneshot;
use tracing::debug;

use crate::dispatch::{Dispatcher, ImageListener};
use crate::manager::LoaderManager;
use crate::pending::{PendingRequests, Waiter};
use crate::pool::Pools;
use crate::{ImageLoaderBuilder, LoadError, Tag, TagHandle, metrics};

/// State shared by clones of an [`ImageLoader`] and its tag handles.
pub(crate) struct Shared {
    pub(crate) pending: Arc<PendingRequests>,
    pub(crate) chains: LoaderManager,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) memory: Arc<MemoryCache>,
    pub(crate) disk: Option<DiskCache>,
    pub(crate) next_tag: AtomicU64,
    // Dropped last: shutting the pools down cancels every running task
    pub(crate) pools: Pools,
}

impl Shared {
    fn start(&self, tag: Option<Tag>, request: Request, waiter: Waiter) {
        let key = request.key().clone();
        if let Some(work) = self.pending.add_request(tag, &key, waiter) {
            debug!(%key, "starting loader chain");
            let store = !request.flags().is_no_store();
            let listener = self.pending.listener(key, work.clone(), store);
            self.chains.start(work, request, listener);
        }
    }

    fn cached(&self, tag: Option<Tag>, request: &Request) -> Option<Image> {
        if request.flags().is_ignore_cache() {
            return None;
        }
        let image = self.pending.get_cached(tag, request.key())?;
        debug!(key = %request.key(), "loaded from memory");
        Some(image)
    }

    /// Detaches `tag` and drops its generation, which discards every
    /// callback posted for it that has not run yet.
    pub(crate) fn cancel(&self, tag: Tag) -> bool {
        let found = self.pending.cancel(tag);
        self.dispatcher.forget(tag);
        found
    }
}

/// Loads images through the memory cache, the disk cache and the network,
/// coalescing concurrent loads of the same resource.
///
/// Cloning is cheap. Worker pools shut down when the last clone is dropped,
/// and futures from [`load_async`](Self::load_async) still waiting then
/// resolve to [`LoadError::Shutdown`].
#[derive(Clone)]
pub struct ImageLoader {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("memory", &self.shared.memory)
            .field("disk", &self.shared.disk)
            .field("pending", &self.pending_count())
            .field("pools", &self.shared.pools)
            .finish_non_exhaustive()
    }
}

impl ImageLoader {
    /// Starts configuring a loader.
    pub fn builder() -> ImageLoaderBuilder {
        ImageLoaderBuilder::default()
    }

    pub(crate) fn from_shared(shared: Shared) -> Self {
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Allocates a tag that cancels its load when dropped.
    pub fn tag(&self) -> TagHandle {
        let sequence = self.shared.next_tag.fetch_add(1, Ordering::Relaxed);
        TagHandle::new(Tag::allocated(sequence), Arc::downgrade(&self.shared))
    }

    /// Loads `request` for `tag`.
    ///
    /// If the memory cache holds the image it is returned right away and
    /// `listener` is not called. Otherwise `None` is returned and `listener`
    /// receives the outcome on the callback executor. Whatever `tag` waited
    /// on before is detached first.
    pub fn load(
        &self,
        tag: Tag,
        request: Request,
        listener: Arc<dyn ImageListener>,
    ) -> Option<Image> {
        self.shared.dispatcher.supersede(tag);
        if let Some(image) = self.shared.cached(Some(tag), &request) {
            self.shared.dispatcher.forget(tag);
            metrics::record_request(true);
            return Some(image);
        }
        metrics::record_request(false);
        self.shared.start(Some(tag), request, Waiter::Listener(listener));
        None
    }

    /// Loads `request` into the caches without a listener.
    ///
    /// Takes part in coalescing: a later load of the same resource joins
    /// this one.
    pub fn preload(&self, request: Request) {
        if self.shared.cached(None, &request).is_some() {
            return;
        }
        metrics::record_request(false);
        self.shared.start(None, request, Waiter::Preload);
    }

    /// Loads `request` and waits for the image.
    ///
    /// The result is delivered directly to the returned future and does not
    /// go through the callback executor.
    pub async fn load_async(&self, request: Request) -> Result<Image, LoadError> {
        if let Some(image) = self.shared.cached(None, &request) {
            metrics::record_request(true);
            return Ok(image);
        }
        metrics::record_request(false);
        let (sender, receiver) = oneshot::channel();
        self.shared.start(None, request, Waiter::Future(sender));
        receiver.await.unwrap_or(Err(LoadError::Shutdown))
    }

    /// Blocks the calling thread until `request` is loaded.
    ///
    /// The chain still runs on the worker pools. Use
    /// `std::io::Error::from` on the error to surface I/O failures with
    /// their original kind.
    pub fn load_blocking(&self, request: Request) -> Result<Image, LoadError> {
        futures::executor::block_on(self.load_async(request))
    }

    /// Detaches `tag` from its load and drops its pending callbacks. The load
    /// is aborted if no one else waits for it.
    ///
    /// Returns `false` if the tag was not waiting for anything.
    pub fn cancel(&self, tag: Tag) -> bool {
        self.shared.cancel(tag)
    }

    /// Returns the memory cache, e.g. to trim it under memory pressure.
    pub fn memory_cache(&self) -> &MemoryCache {
        &self.shared.memory
    }

    /// Returns the disk cache, if one is in use.
    pub fn disk_cache(&self) -> Option<&DiskCache> {
        self.shared.disk.as_ref()
    }

    /// Returns the number of resources with a load in flight.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    #[cfg(test)]
    pub(crate) fn tracked_tags(&self) -> usize {
        self.shared.dispatcher.tracked_tags()
    }

    #[cfg(test)]
    pub(crate) fn stage_names(&self, request: &Request) -> Vec<&'static str> {
        self.shared.chains.stage_names(request)
    }
}
