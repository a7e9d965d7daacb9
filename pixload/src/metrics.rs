//! Metrics declaration and recording.
//!
//! With the `metrics` feature enabled the loader publishes:
//!
//! - `pixload_requests_total` - load calls, by `source` (`memory` for the
//!   synchronous fast path, `chain` for everything else)
//! - `pixload_dedup_joins_total` - requests that joined an in-flight load
//! - `pixload_cancellations_total` - in-flight loads aborted after their
//!   last tag went away
//! - `pixload_disk_lookups_total` - disk stage lookups, by `result`
//! - `pixload_network_fetches_total` - network transfers, by `kind`
//!   (`foreground` or `revalidation`)
//! - `pixload_not_modified_total` - conditional requests answered with 304
//! - `pixload_errors_total` - failed loads, by `kind`
//! - `pixload_load_duration_seconds` - time from starting a chain to its
//!   delivery, by `status`
//!
//! Without the feature every function here is a no-op.

use std::time::Duration;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

use crate::LoadError;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Track number of load calls.
    pub static ref REQUESTS: &'static str = {
        metrics::describe_counter!(
            "pixload_requests_total",
            "Total number of image load calls."
        );
        "pixload_requests_total"
    };
    /// Track number of requests served by an in-flight load.
    pub static ref DEDUP_JOINS: &'static str = {
        metrics::describe_counter!(
            "pixload_dedup_joins_total",
            "Total number of requests that joined an in-flight load."
        );
        "pixload_dedup_joins_total"
    };
    /// Track number of aborted loads.
    pub static ref CANCELLATIONS: &'static str = {
        metrics::describe_counter!(
            "pixload_cancellations_total",
            "Total number of in-flight loads cancelled."
        );
        "pixload_cancellations_total"
    };
    /// Track disk stage lookups.
    pub static ref DISK_LOOKUPS: &'static str = {
        metrics::describe_counter!(
            "pixload_disk_lookups_total",
            "Total number of disk cache lookups."
        );
        "pixload_disk_lookups_total"
    };
    /// Track network transfers.
    pub static ref NETWORK_FETCHES: &'static str = {
        metrics::describe_counter!(
            "pixload_network_fetches_total",
            "Total number of network fetches."
        );
        "pixload_network_fetches_total"
    };
    /// Track 304 responses.
    pub static ref NOT_MODIFIED: &'static str = {
        metrics::describe_counter!(
            "pixload_not_modified_total",
            "Total number of conditional requests answered with not modified."
        );
        "pixload_not_modified_total"
    };
    /// Track failed loads.
    pub static ref ERRORS: &'static str = {
        metrics::describe_counter!(
            "pixload_errors_total",
            "Total number of failed loads."
        );
        "pixload_errors_total"
    };
    /// Histogram of chain duration.
    pub static ref LOAD_DURATION: &'static str = {
        metrics::describe_histogram!(
            "pixload_load_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of loads that went through the loader chain."
        );
        "pixload_load_duration_seconds"
    };
}

#[cfg_attr(not(feature = "metrics"), allow(dead_code))]
fn error_kind(error: &LoadError) -> &'static str {
    match error {
        LoadError::Io(_) => "io",
        LoadError::Network(_) => "network",
        LoadError::Decode(_) => "decode",
        LoadError::EmptyTransform(_) => "empty_transform",
        LoadError::Exhausted(_) => "exhausted",
        LoadError::Internal(_) => "internal",
        LoadError::Shutdown => "shutdown",
    }
}

/// Record a load call served from memory (`fast_path`) or by the chain.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_request(fast_path: bool) {
    let source = if fast_path { "memory" } else { "chain" };
    metrics::counter!(*REQUESTS, "source" => source).increment(1);
}

/// Record a load call (no-op when `metrics` feature disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_request(_fast_path: bool) {}

/// Record a request joining an in-flight load.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_dedup_join() {
    metrics::counter!(*DEDUP_JOINS).increment(1);
}

/// Record a dedup join (no-op when `metrics` feature disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_dedup_join() {}

/// Record an aborted load.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_cancellation() {
    metrics::counter!(*CANCELLATIONS).increment(1);
}

/// Record an aborted load (no-op when `metrics` feature disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_cancellation() {}

/// Record a disk stage lookup.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_disk_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!(*DISK_LOOKUPS, "result" => result).increment(1);
}

/// Record a disk lookup (no-op when `metrics` feature disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_disk_lookup(_hit: bool) {}

/// Record a network transfer.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_network_fetch(revalidation: bool) {
    let kind = if revalidation { "revalidation" } else { "foreground" };
    metrics::counter!(*NETWORK_FETCHES, "kind" => kind).increment(1);
}

/// Record a network transfer (no-op when `metrics` feature disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_network_fetch(_revalidation: bool) {}

/// Record a 304 response.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_not_modified() {
    metrics::counter!(*NOT_MODIFIED).increment(1);
}

/// Record a 304 response (no-op when `metrics` feature disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_not_modified() {}

/// Record the outcome of a chain execution.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_delivery(duration: Duration, error: Option<&LoadError>) {
    let status = match error {
        None => "success",
        Some(error) => {
            metrics::counter!(*ERRORS, "kind" => error_kind(error)).increment(1);
            "error"
        }
    };
    metrics::histogram!(*LOAD_DURATION, "status" => status).record(duration.as_secs_f64());
}

/// Record the outcome of a chain execution (no-op when `metrics` feature
/// disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_delivery(_duration: Duration, _error: Option<&LoadError>) {}
