//! In-flight request tracking: coalescing by cache key and cancellation by
//! tag.
//!
//! Two maps are kept under one lock because their invariants span both:
//! `tag -> key` and `key -> group`. A group owns the single [`LoaderWork`]
//! running for its key and every waiter attached to it.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use pixload_core::{ByteSource, CacheKey, Image, ImageCodec, Metadata};
use pixload_memory::MemoryCache;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::dispatch::{Dispatcher, ImageListener, Outcome};
use crate::loader::{Listener, LoaderEvent, LoaderWork};
use crate::{LoadError, Tag, metrics};

/// Someone waiting for a load.
pub(crate) enum Waiter {
    /// Called back through the dispatcher.
    Listener(Arc<dyn ImageListener>),
    /// Completed directly, bypassing the callback context.
    Future(oneshot::Sender<Result<Image, LoadError>>),
    /// Only wants the caches primed.
    Preload,
}

impl Waiter {
    fn listener(&self) -> Option<&Arc<dyn ImageListener>> {
        match self {
            Waiter::Listener(listener) => Some(listener),
            _ => None,
        }
    }
}

struct Group {
    work: Arc<LoaderWork>,
    tagged: Vec<(Tag, Waiter)>,
    untagged: Vec<Waiter>,
    started: Instant,
}

impl Group {
    fn new(work: Arc<LoaderWork>) -> Self {
        Self {
            work,
            tagged: Vec::new(),
            untagged: Vec::new(),
            started: Instant::now(),
        }
    }

    fn attach(&mut self, tag: Option<Tag>, waiter: Waiter) {
        match tag {
            Some(tag) => self.tagged.push((tag, waiter)),
            None => self.untagged.push(waiter),
        }
    }

    fn is_empty(&self) -> bool {
        self.tagged.is_empty() && self.untagged.is_empty()
    }

    fn len(&self) -> usize {
        self.tagged.len() + self.untagged.len()
    }

    fn into_waiters(self) -> impl Iterator<Item = (Option<Tag>, Waiter)> {
        self.tagged
            .into_iter()
            .map(|(tag, waiter)| (Some(tag), waiter))
            .chain(self.untagged.into_iter().map(|waiter| (None, waiter)))
    }
}

#[derive(Default)]
struct Tables {
    tags: HashMap<Tag, CacheKey>,
    groups: HashMap<CacheKey, Group>,
}

impl Tables {
    /// Removes `tag` from its group. Returns the group's work if the tag was
    /// its last waiter.
    fn detach(&mut self, tag: Tag) -> Option<Arc<LoaderWork>> {
        let key = self.tags.remove(&tag)?;
        let group = self.groups.get_mut(&key)?;
        group.tagged.retain(|(t, _)| *t != tag);
        if !group.is_empty() {
            return None;
        }
        self.groups.remove(&key).map(|group| group.work)
    }

    /// Removes the group for `key` if it is still served by `work`.
    fn take(&mut self, key: &CacheKey, work: &Arc<LoaderWork>) -> Option<Group> {
        match self.groups.get(key) {
            Some(group) if Arc::ptr_eq(&group.work, work) => {}
            _ => return None,
        }
        let group = self.groups.remove(key)?;
        for (tag, _) in &group.tagged {
            self.tags.remove(tag);
        }
        Some(group)
    }
}

/// Deduplication table shared by every load of an
/// [`ImageLoader`](crate::ImageLoader).
pub(crate) struct PendingRequests {
    memory: Arc<MemoryCache>,
    codec: Arc<dyn ImageCodec>,
    dispatcher: Dispatcher,
    tables: Mutex<Tables>,
}

impl PendingRequests {
    pub(crate) fn new(
        memory: Arc<MemoryCache>,
        codec: Arc<dyn ImageCodec>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            memory,
            codec,
            dispatcher,
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Synchronous fast path: returns the image if the memory cache holds
    /// `key`, cancelling whatever `tag` waited on before.
    pub(crate) fn get_cached(&self, tag: Option<Tag>, key: &CacheKey) -> Option<Image> {
        let cached = self.memory.get(key)?;
        if let Some(tag) = tag {
            self.cancel(tag);
        }
        Some(cached.image)
    }

    /// Registers `waiter` for `key`.
    ///
    /// Returns a fresh [`LoaderWork`] when the caller has to start the chain,
    /// or `None` when the waiter joined a load already in flight. A tag that
    /// already waits for `key` is left as it is.
    pub(crate) fn add_request(
        &self,
        tag: Option<Tag>,
        key: &CacheKey,
        waiter: Waiter,
    ) -> Option<Arc<LoaderWork>> {
        let mut abandoned = None;
        let work = {
            let mut tables = self.tables.lock();
            if let Some(tag) = tag {
                if tables.tags.get(&tag) == Some(key) {
                    trace!(%key, %tag, "tag already waits for this key");
                    return None;
                }
                abandoned = tables.detach(tag);
                tables.tags.insert(tag, key.clone());
            }
            match tables.groups.entry(key.clone()) {
                Entry::Occupied(mut entry) => {
                    debug!(%key, waiters = entry.get().len() + 1, "reusing in-flight request");
                    metrics::record_dedup_join();
                    entry.get_mut().attach(tag, waiter);
                    None
                }
                Entry::Vacant(entry) => {
                    let work = Arc::new(LoaderWork::new());
                    entry.insert(Group::new(work.clone())).attach(tag, waiter);
                    Some(work)
                }
            }
        };
        if let Some(abandoned) = abandoned {
            Self::abort(abandoned);
        }
        work
    }

    /// Detaches `tag`, cancelling its load if no one else waits for it.
    /// Returns `false` if the tag was not waiting for anything.
    pub(crate) fn cancel(&self, tag: Tag) -> bool {
        let (found, abandoned) = {
            let mut tables = self.tables.lock();
            let found = tables.tags.contains_key(&tag);
            (found, tables.detach(tag))
        };
        if let Some(abandoned) = abandoned {
            debug!(%tag, "cancelling in-flight request");
            Self::abort(abandoned);
        }
        found
    }

    fn abort(work: Arc<LoaderWork>) {
        metrics::record_cancellation();
        work.cancel();
    }

    /// Number of keys with a load in flight.
    pub(crate) fn len(&self) -> usize {
        self.tables.lock().groups.len()
    }

    /// Creates the listener that terminates the chain for `key`.
    pub(crate) fn listener(
        self: &Arc<Self>,
        key: CacheKey,
        work: Arc<LoaderWork>,
        store: bool,
    ) -> Arc<dyn Listener> {
        Arc::new(RequestListener {
            pending: Arc::downgrade(self),
            key,
            work,
            store,
        })
    }

    fn deliver_result(
        &self,
        key: &CacheKey,
        work: &Arc<LoaderWork>,
        image: Image,
        metadata: Metadata,
        store: bool,
    ) {
        // Cache first so that a request racing with the removal below hits
        // memory instead of starting a second chain
        if store {
            self.memory.put(key.clone(), image.clone(), metadata);
        }
        let Some(group) = self.tables.lock().take(key, work) else {
            debug!(%key, "dropping result nobody waits for");
            return;
        };
        metrics::record_delivery(group.started.elapsed(), None);
        debug!(%key, waiters = group.len(), "delivering image");
        for (tag, waiter) in group.into_waiters() {
            self.complete(tag, waiter, Ok(image.clone()));
        }
    }

    fn deliver_error(&self, key: &CacheKey, work: &Arc<LoaderWork>, error: LoadError) {
        let Some(group) = self.tables.lock().take(key, work) else {
            debug!(%key, %error, "dropping error nobody waits for");
            return;
        };
        metrics::record_delivery(group.started.elapsed(), Some(&error));
        debug!(%key, %error, waiters = group.len(), "delivering error");
        for (tag, waiter) in group.into_waiters() {
            self.complete(tag, waiter, Err(error.clone()));
        }
    }

    fn deliver_not_modified(&self, key: &CacheKey, work: &Arc<LoaderWork>, metadata: Metadata) {
        self.memory.update_metadata(key, metadata);
        match self.memory.peek(key) {
            Some(cached) => self.deliver_result(key, work, cached.image, cached.metadata, false),
            None => {
                warn!(%key, "not modified, but nothing is cached");
                self.deliver_error(
                    key,
                    work,
                    LoadError::Internal(format!("{key} was not modified but is not cached")),
                );
            }
        }
    }

    fn deliver_progress(&self, key: &CacheKey, work: &Arc<LoaderWork>, progress: f32) {
        let listeners: Vec<(Option<Tag>, Arc<dyn ImageListener>)> = {
            let tables = self.tables.lock();
            match tables.groups.get(key) {
                Some(group) if Arc::ptr_eq(&group.work, work) => group
                    .tagged
                    .iter()
                    .filter_map(|(tag, waiter)| Some((Some(*tag), waiter.listener()?.clone())))
                    .chain(
                        group
                            .untagged
                            .iter()
                            .filter_map(|waiter| Some((None, waiter.listener()?.clone()))),
                    )
                    .collect(),
                _ => return,
            }
        };
        for (tag, listener) in listeners {
            self.dispatcher.post(tag, listener, Outcome::Progress(progress));
        }
    }

    fn complete(&self, tag: Option<Tag>, waiter: Waiter, result: Result<Image, LoadError>) {
        match waiter {
            Waiter::Listener(listener) => {
                let outcome = match result {
                    Ok(image) => Outcome::Success(image),
                    Err(error) => Outcome::Error(error),
                };
                self.dispatcher.post(tag, listener, outcome);
            }
            Waiter::Future(sender) => {
                // The receiver may have given up
                let _ = sender.send(result);
            }
            Waiter::Preload => {}
        }
    }

    fn decode(
        &self,
        source: &ByteSource,
        key: &CacheKey,
        work: &Arc<LoaderWork>,
    ) -> Result<Image, LoadError> {
        let data =
            source.read_with_progress(|progress| self.deliver_progress(key, work, progress))?;
        Ok(self.codec.decode(&data)?)
    }
}

/// Terminates a chain: decodes streams and fans the outcome out to the
/// group waiting for `key`.
struct RequestListener {
    pending: Weak<PendingRequests>,
    key: CacheKey,
    work: Arc<LoaderWork>,
    store: bool,
}

impl Listener for RequestListener {
    fn on_event(&self, event: LoaderEvent) {
        let Some(pending) = self.pending.upgrade() else {
            trace!(key = %self.key, "loader is gone, dropping event");
            return;
        };
        let (key, work) = (&self.key, &self.work);
        match event {
            LoaderEvent::Stream { source, metadata } => match pending.decode(&source, key, work) {
                Ok(image) => pending.deliver_result(key, work, image, metadata, self.store),
                Err(error) => pending.deliver_error(key, work, error),
            },
            LoaderEvent::Image { image, metadata } => {
                pending.deliver_result(key, work, image, metadata, self.store)
            }
            LoaderEvent::NotModified(metadata) => pending.deliver_not_modified(key, work, metadata),
            LoaderEvent::Error(error) => pending.deliver_error(key, work, error),
            LoaderEvent::Progress(progress) => pending.deliver_progress(key, work, progress),
        }
    }
}
