//! Dedicated worker pools.
//!
//! Each pool is its own tokio runtime so that pool identity is preserved:
//! disk work runs on a single worker and is therefore serialized, and
//! revalidation checks never compete with foreground fetches for workers.

use std::future::Future;
use std::io;

use pixload_core::CacheKey;
use smol_str::SmolStr;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::AbortHandle;
use tracing::{Instrument, info_span, trace};

/// Default number of network workers.
pub const DEFAULT_NETWORK_THREADS: usize = 4;

/// Handle to a worker pool. Cloning is cheap.
///
/// A handle does not keep its pool alive: once the owning loader is dropped,
/// spawned tasks are cancelled.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: SmolStr,
    handle: Handle,
}

impl WorkerPool {
    /// Returns the pool name used in spans and thread names.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn spawn<F>(&self, key: &CacheKey, task: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = info_span!("pixload_task", pool = %self.name, key = %key);
        trace!(pool = %self.name, %key, "spawning loader task");
        self.handle.spawn(task.instrument(span)).abort_handle()
    }
}

/// Owns a pool runtime and shuts it down without blocking when dropped.
struct OwnedPool {
    runtime: Option<Runtime>,
    pool: WorkerPool,
}

impl OwnedPool {
    fn new(name: &'static str, threads: usize) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .thread_name(format!("pixload-{name}"))
            .enable_all()
            .build()?;
        let pool = WorkerPool {
            name: SmolStr::new_static(name),
            handle: runtime.handle().clone(),
        };
        Ok(Self {
            runtime: Some(runtime),
            pool,
        })
    }
}

impl Drop for OwnedPool {
    fn drop(&mut self) {
        // Dropping a runtime blocks, which is not allowed inside async code
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for OwnedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.pool.fmt(f)
    }
}

/// The three pools of a loader: disk (1 worker), network (N workers) and
/// revalidation (1 worker).
#[derive(Debug)]
pub(crate) struct Pools {
    disk: OwnedPool,
    network: OwnedPool,
    revalidation: OwnedPool,
}

impl Pools {
    pub(crate) fn new(network_threads: usize) -> Result<Self, (&'static str, io::Error)> {
        Ok(Self {
            disk: OwnedPool::new("disk", 1).map_err(|e| ("disk", e))?,
            network: OwnedPool::new("network", network_threads).map_err(|e| ("network", e))?,
            revalidation: OwnedPool::new("revalidation", 1).map_err(|e| ("revalidation", e))?,
        })
    }

    pub(crate) fn disk(&self) -> &WorkerPool {
        &self.disk.pool
    }

    pub(crate) fn network(&self) -> &WorkerPool {
        &self.network.pool
    }

    pub(crate) fn revalidation(&self) -> &WorkerPool {
        &self.revalidation.pool
    }
}
