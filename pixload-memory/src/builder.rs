//! Builder for configuring [`MemoryCache`].

use pixload_core::SmolStr;

use crate::cache::MemoryCache;

/// Builder for creating and configuring a [`MemoryCache`].
///
/// Use [`MemoryCache::builder`] to create a new builder instance.
///
/// # Examples
///
/// ```
/// use pixload_memory::MemoryCache;
///
/// let cache = MemoryCache::builder(64 * 1024 * 1024)
///     .label("avatars")
///     .build();
/// assert_eq!(cache.label(), "avatars");
/// ```
#[derive(Debug, Clone)]
pub struct MemoryCacheBuilder {
    max_size: usize,
    label: SmolStr,
}

impl MemoryCacheBuilder {
    /// Creates a builder for a cache holding at most `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            label: SmolStr::new_static("memory"),
        }
    }

    /// Sets the byte budget.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Sets the label used in logs and metrics. Defaults to `"memory"`.
    pub fn label(mut self, label: impl Into<SmolStr>) -> Self {
        self.label = label.into();
        self
    }

    /// Builds the cache.
    pub fn build(self) -> MemoryCache {
        MemoryCache::from_parts(self.label, self.max_size)
    }
}
