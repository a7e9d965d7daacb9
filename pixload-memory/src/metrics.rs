//! Memory cache capacity metrics.
//!
//! Enable the `metrics` feature to publish these gauges.
//!
//! ## Metrics
//!
//! - `pixload_memory_entries` - Current number of images in the cache (gauge)
//! - `pixload_memory_size_bytes` - Current decoded size in bytes (gauge)
//!
//! Both metrics carry a `cache` label to distinguish multiple instances.

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Metric name for the entry count gauge.
    pub static ref MEMORY_ENTRIES: &'static str = {
        metrics::describe_gauge!(
            "pixload_memory_entries",
            "Current number of images in the memory cache."
        );
        "pixload_memory_entries"
    };

    /// Metric name for the size gauge.
    pub static ref MEMORY_SIZE_BYTES: &'static str = {
        metrics::describe_gauge!(
            "pixload_memory_size_bytes",
            "Current decoded size of the memory cache in bytes."
        );
        "pixload_memory_size_bytes"
    };
}

/// Record current cache capacity metrics.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_capacity(cache: &str, entries: u64, size_bytes: u64) {
    metrics::gauge!(*MEMORY_ENTRIES, "cache" => cache.to_string()).set(entries as f64);
    metrics::gauge!(*MEMORY_SIZE_BYTES, "cache" => cache.to_string()).set(size_bytes as f64);
}

/// Record current cache capacity metrics (no-op when `metrics` feature disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_capacity(_cache: &str, _entries: u64, _size_bytes: u64) {}
