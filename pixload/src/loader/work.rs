use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use parking_lot::Mutex;
use pixload_core::{ByteSource, CacheKey, Image, Metadata, Request};
use tokio::task::AbortHandle;
use tracing::{error, trace};

use super::{Chain, Listener, LoaderEvent};
use crate::{LoadError, WorkerPool};

/// Cancellation scope of one chain execution.
///
/// Collects every task spawned on behalf of the chain. After
/// [`cancel`](Self::cancel) the tasks are aborted and no stage delivers
/// anything further.
#[derive(Debug, Default)]
pub struct LoaderWork {
    cancelled: AtomicBool,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl LoaderWork {
    /// Creates an empty, active scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Cancels the chain and aborts its tasks. Idempotent.
    ///
    /// I/O already in progress may still complete, but its result is
    /// dropped.
    pub fn cancel(&self) {
        let tasks = {
            let mut tasks = self.tasks.lock();
            if self.cancelled.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *tasks)
        };
        trace!(tasks = tasks.len(), "cancelling loader work");
        for task in tasks {
            task.abort();
        }
    }

    /// Returns the number of tracked tasks that have not finished.
    pub fn active_tasks(&self) -> usize {
        self.tasks.lock().iter().filter(|t| !t.is_finished()).count()
    }

    fn track(&self, task: AbortHandle) {
        let mut tasks = self.tasks.lock();
        if self.is_cancelled() {
            task.abort();
            return;
        }
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }
}

/// A stage's handle on the chain it runs in.
///
/// Delivers events to the listener above the stage and advances the
/// request to the next stage. Every delivery is suppressed once the
/// [`LoaderWork`] is cancelled.
#[derive(Clone)]
pub struct Manager {
    work: Arc<LoaderWork>,
    chain: Chain,
    position: usize,
    listener: Arc<dyn Listener>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("position", &self.position)
            .field("stages", &self.chain.len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Manager {
    /// Creates a manager positioned before the first stage of `chain`.
    pub fn new(work: Arc<LoaderWork>, chain: Chain, listener: Arc<dyn Listener>) -> Self {
        Self {
            work,
            chain,
            position: 0,
            listener,
        }
    }

    /// Hands `request` to the first stage.
    pub fn start(self, request: Request) {
        self.dispatch(0, request, self.listener.clone());
    }

    /// Returns the cancellation scope.
    pub fn work(&self) -> &Arc<LoaderWork> {
        &self.work
    }

    /// Returns `true` if the chain was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.work.is_cancelled()
    }

    /// Returns a manager at the same position delivering to `listener`.
    pub fn with_listener(&self, listener: Arc<dyn Listener>) -> Self {
        Self {
            listener,
            ..self.clone()
        }
    }

    /// Runs `task` on `pool` as part of this chain.
    ///
    /// The task is aborted when the chain is cancelled. A panicking task is
    /// reported upward as [`LoadError::Internal`].
    pub fn spawn<F>(&self, pool: &WorkerPool, key: &CacheKey, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_cancelled() {
            trace!(pool = pool.name(), %key, "not spawning task of cancelled work");
            return;
        }
        let manager = self.clone();
        let handle = pool.spawn(key, async move {
            if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "loader task panicked");
                manager.deliver_error(LoadError::Internal(message));
            }
        });
        self.work.track(handle);
    }

    /// Forwards `request` to the next stage, keeping the current listener.
    pub fn next(&self, request: Request) {
        self.next_with(request, self.listener.clone());
    }

    /// Forwards `request` to the next stage, which delivers to `listener`.
    ///
    /// Past the last stage this delivers [`LoadError::Exhausted`].
    pub fn next_with(&self, request: Request, listener: Arc<dyn Listener>) {
        self.dispatch(self.position + 1, request, listener);
    }

    fn dispatch(&self, position: usize, request: Request, listener: Arc<dyn Listener>) {
        if self.is_cancelled() {
            return;
        }
        match self.chain.get(position) {
            Some(stage) => {
                trace!(stage = stage.name(), key = %request.key(), "advancing request");
                let manager = Manager {
                    work: self.work.clone(),
                    chain: self.chain.clone(),
                    position,
                    listener,
                };
                stage.load(manager, request);
            }
            None => {
                let error = LoadError::Exhausted(request.key().clone());
                listener.on_event(LoaderEvent::Error(error));
            }
        }
    }

    /// Delivers encoded bytes upward.
    pub fn deliver_stream(&self, source: ByteSource, metadata: Metadata) {
        self.deliver(LoaderEvent::Stream { source, metadata });
    }

    /// Delivers a decoded image upward.
    pub fn deliver_image(&self, image: Image, metadata: Metadata) {
        self.deliver(LoaderEvent::Image { image, metadata });
    }

    /// Reports that the cached copy is still valid.
    pub fn deliver_not_modified(&self, metadata: Metadata) {
        self.deliver(LoaderEvent::NotModified(metadata));
    }

    /// Delivers a failure upward.
    pub fn deliver_error(&self, error: LoadError) {
        self.deliver(LoaderEvent::Error(error));
    }

    /// Reports progress upward.
    pub fn deliver_progress(&self, progress: f32) {
        self.deliver(LoaderEvent::Progress(progress));
    }

    /// Delivers `event` upward unless the chain was cancelled.
    pub fn deliver(&self, event: LoaderEvent) {
        if self.is_cancelled() {
            trace!("dropping event of cancelled work");
            return;
        }
        self.listener.on_event(event);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "loader task panicked".to_owned()
    }
}
