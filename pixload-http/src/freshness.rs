//! Expiry computation from response headers.
//!
//! The expiry of a fetched resource is chosen by priority:
//!
//! 1. a forced override ([`MaxAgeOverride`]),
//! 2. `Cache-Control: max-age`,
//! 3. `Expires`,
//! 4. the configured default max-age.
//!
//! `max-age=0` makes the entry stale immediately. An unparseable `Expires`
//! is ignored and the default applies.

use std::time::{Duration, SystemTime};

use chrono::{DateTime, TimeDelta, Utc};
use http::HeaderMap;
use http::header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, EXPIRES, LAST_MODIFIED};
use pixload_core::{Expiry, Metadata};
use serde::{Deserialize, Serialize};

/// Default max-age used when a response carries no freshness headers.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Administrator override of response freshness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaxAgeOverride {
    /// Use response headers and the default max-age.
    #[default]
    NotForced,
    /// Every fetched entry never expires.
    Forever,
    /// Every fetched entry expires this long after it was fetched.
    For(#[serde(with = "humantime_serde")] Duration),
}

/// Computes [`Metadata`] for responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    /// Max-age applied when the response has no freshness headers.
    pub default_max_age: Duration,
    /// Override that takes precedence over response headers.
    pub forced: MaxAgeOverride,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            default_max_age: DEFAULT_MAX_AGE,
            forced: MaxAgeOverride::NotForced,
        }
    }
}

impl FreshnessPolicy {
    /// Computes the expiry of a response received at `now`.
    pub fn expires(&self, headers: &HeaderMap, now: DateTime<Utc>) -> Expiry {
        match self.forced {
            MaxAgeOverride::Forever => return Expiry::Never,
            MaxAgeOverride::For(max_age) => return after(now, max_age),
            MaxAgeOverride::NotForced => {}
        }

        if let Some(max_age) = max_age(headers) {
            return after(now, max_age);
        }
        if let Some(expires) = http_date(headers, EXPIRES) {
            return Expiry::At(expires);
        }
        after(now, self.default_max_age)
    }

    /// Builds metadata for a response received at `now`.
    pub fn metadata(&self, headers: &HeaderMap, now: DateTime<Utc>) -> Metadata {
        let content_type = header_str(headers, CONTENT_TYPE).unwrap_or_default();
        let etag = header_str(headers, ETAG).unwrap_or_default();
        Metadata::new(
            content_type,
            http_date(headers, LAST_MODIFIED),
            self.expires(headers, now),
            etag,
        )
    }
}

fn after(now: DateTime<Utc>, max_age: Duration) -> Expiry {
    TimeDelta::from_std(max_age)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .map_or(Expiry::Never, Expiry::At)
}

fn header_str(headers: &HeaderMap, name: http::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn http_date(headers: &HeaderMap, name: http::HeaderName) -> Option<DateTime<Utc>> {
    let value = header_str(headers, name)?;
    httpdate::parse_http_date(value)
        .ok()
        .map(DateTime::<Utc>::from)
}

fn max_age(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .find_map(|directive| {
            let (name, value) = directive.trim().split_once('=')?;
            if !name.trim().eq_ignore_ascii_case("max-age") {
                return None;
            }
            value.trim().trim_matches('"').parse::<u64>().ok()
        })
        .map(Duration::from_secs)
}

/// Converts a timestamp into the value of an HTTP date header.
pub fn to_http_date(time: DateTime<Utc>) -> String {
    httpdate::fmt_http_date(SystemTime::from(time))
}
