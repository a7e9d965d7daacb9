//! Delivery of results to image listeners on a designated callback context.

use std::fmt::Debug;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use dashmap::DashMap;
use pixload_core::Image;
use tokio::sync::mpsc;
use tracing::{error, trace, warn};

use crate::{LoadError, Tag};

/// A callback posted to a [`CallbackExecutor`].
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Receives the outcome of loads started with
/// [`ImageLoader::load`](crate::ImageLoader::load).
///
/// Callbacks run on the loader's [`CallbackExecutor`], never on the thread
/// that called `load`.
pub trait ImageListener: Send + Sync {
    /// The image is ready.
    fn on_success(&self, tag: Option<Tag>, image: Image);

    /// The load failed.
    fn on_error(&self, tag: Option<Tag>, error: LoadError);

    /// Fraction of the transfer or decode completed.
    fn on_progress(&self, tag: Option<Tag>, progress: f32) {
        let _ = (tag, progress);
    }
}

/// Context that runs listener callbacks, typically the host's UI loop.
pub trait CallbackExecutor: Send + Sync + Debug {
    /// Schedules `callback`. Must not block on the callback's completion.
    fn execute(&self, callback: Callback);
}

/// Runs callbacks in order on one dedicated thread.
///
/// The thread stops once the executor and every loader using it are
/// dropped.
#[derive(Debug, Clone)]
pub struct ThreadExecutor {
    sender: mpsc::UnboundedSender<Callback>,
}

impl ThreadExecutor {
    /// Starts a callback thread named `pixload-callbacks`.
    pub fn new() -> io::Result<Self> {
        Self::named("pixload-callbacks")
    }

    /// Starts a callback thread with the given name.
    pub fn named(name: impl Into<String>) -> io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Callback>();
        thread::Builder::new().name(name.into()).spawn(move || {
            while let Some(callback) = receiver.blocking_recv() {
                if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                    error!("image listener panicked");
                }
            }
            trace!("callback thread stopped");
        })?;
        Ok(Self { sender })
    }
}

impl CallbackExecutor for ThreadExecutor {
    fn execute(&self, callback: Callback) {
        if self.sender.send(callback).is_err() {
            warn!("callback thread is gone, dropping callback");
        }
    }
}

/// Runs callbacks immediately on the worker thread that produced them.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl CallbackExecutor for InlineExecutor {
    fn execute(&self, callback: Callback) {
        callback();
    }
}

pub(crate) enum Outcome {
    Success(Image),
    Error(LoadError),
    Progress(f32),
}

/// Posts listener callbacks and drops those whose tag has been cancelled
/// or reused by the time they run.
///
/// Every tag waiting on a load carries a generation, replaced from a global
/// counter whenever the tag starts a new load. A callback runs only if the
/// generation it was posted under is still current. Cancelling a tag drops
/// its generation, and so does running its final callback, so only tags
/// with work outstanding are tracked.
#[derive(Debug, Clone)]
pub(crate) struct Dispatcher {
    executor: Arc<dyn CallbackExecutor>,
    generations: Arc<DashMap<Tag, u64>>,
    counter: Arc<AtomicU64>,
}

impl Dispatcher {
    pub(crate) fn new(executor: Arc<dyn CallbackExecutor>) -> Self {
        Self {
            executor,
            generations: Arc::new(DashMap::new()),
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Invalidates every callback already posted for `tag`.
    pub(crate) fn supersede(&self, tag: Tag) {
        let generation = self.counter.fetch_add(1, Ordering::Relaxed);
        self.generations.insert(tag, generation);
    }

    /// Stops tracking `tag`. Callbacks already posted for it are dropped.
    pub(crate) fn forget(&self, tag: Tag) {
        self.generations.remove(&tag);
    }

    #[cfg(test)]
    pub(crate) fn tracked_tags(&self) -> usize {
        self.generations.len()
    }

    pub(crate) fn post(
        &self,
        tag: Option<Tag>,
        listener: Arc<dyn ImageListener>,
        outcome: Outcome,
    ) {
        let generation = match tag {
            Some(tag) => match self.generations.get(&tag).map(|g| *g) {
                Some(generation) => Some(generation),
                None => {
                    trace!(%tag, "dropping callback for an untracked tag");
                    return;
                }
            },
            None => None,
        };
        let generations = self.generations.clone();
        self.executor.execute(Box::new(move || {
            if let (Some(tag), Some(posted)) = (tag, generation)
                && generations.get(&tag).map(|g| *g) != Some(posted)
            {
                trace!(%tag, "dropping superseded callback");
                return;
            }
            match outcome {
                Outcome::Success(image) => listener.on_success(tag, image),
                Outcome::Error(error) => listener.on_error(tag, error),
                Outcome::Progress(progress) => {
                    listener.on_progress(tag, progress);
                    return;
                }
            }
            if let (Some(tag), Some(posted)) = (tag, generation) {
                generations.remove_if(&tag, |_, current| *current == posted);
            }
        }));
    }
}
