use std::sync::Arc;

use pixload_core::Request;
use pixload_memory::MemoryCache;
use tracing::debug;

use super::{Loader, Manager};

/// Answers from the [`MemoryCache`] and otherwise forwards the request
/// unchanged.
///
/// Only used inside transformed chains, where it serves an already decoded
/// original to the transform. Misses pass through with the caller's
/// listener, so the transform still sees the encoded stream and nothing is
/// stored here.
#[derive(Debug, Clone)]
pub struct MemoryLoader {
    memory: Arc<MemoryCache>,
}

impl MemoryLoader {
    /// Creates the stage.
    pub fn new(memory: Arc<MemoryCache>) -> Self {
        Self { memory }
    }
}

impl Loader for MemoryLoader {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load(&self, manager: Manager, request: Request) {
        if !request.flags().is_ignore_cache()
            && let Some(cached) = self.memory.get(request.key())
        {
            debug!(key = %request.key(), "loaded from memory");
            manager.deliver_image(cached.image, cached.metadata);
            return;
        }
        manager.next(request);
    }
}
