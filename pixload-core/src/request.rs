//! Image requests.
//!
//! A [`Request`] names the resource to load (a URL), an optional
//! [`Transformation`], an optional metadata hint used for conditional
//! revalidation, and per-request [`Flags`].
//!
//! Invalid URLs are rejected when the request is built, so nothing malformed
//! ever enters a loader chain:
//!
//! ```
//! use pixload_core::{Request, RequestError};
//!
//! let request = Request::new("https://example.com/cat.png").unwrap();
//! assert_eq!(request.key().url(), "https://example.com/cat.png");
//!
//! assert!(matches!(Request::new("not a url"), Err(RequestError::InvalidUrl { .. })));
//! ```

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::key::CacheKey;
use crate::metadata::Metadata;
use crate::transformation::Transformation;

/// Errors raised while building a [`Request`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The URL could not be parsed.
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl {
        /// The rejected input.
        url: String,
        /// Parser message.
        reason: String,
    },
}

/// Per-request cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags {
    ignore_cache: bool,
    no_store: bool,
}

impl Flags {
    /// Default flags: read from and write to every cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip memory and disk lookups. Results are still written back.
    pub fn ignore_cache(mut self, value: bool) -> Self {
        self.ignore_cache = value;
        self
    }

    /// Do not write the result to the memory or disk cache.
    pub fn no_store(mut self, value: bool) -> Self {
        self.no_store = value;
        self
    }

    /// Returns `true` if cache lookups are skipped.
    pub fn is_ignore_cache(&self) -> bool {
        self.ignore_cache
    }

    /// Returns `true` if write-back is skipped.
    pub fn is_no_store(&self) -> bool {
        self.no_store
    }
}

/// A request for an image.
///
/// Requests are immutable; the `with_*` methods return modified copies.
#[derive(Clone)]
pub struct Request {
    url: Url,
    key: CacheKey,
    transformation: Option<Arc<dyn Transformation>>,
    metadata: Option<Metadata>,
    flags: Flags,
}

impl Request {
    /// Creates a request for `url`.
    pub fn new(url: impl AsRef<str>) -> Result<Self, RequestError> {
        let raw = url.as_ref();
        let url = Url::parse(raw).map_err(|e| RequestError::InvalidUrl {
            url: raw.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_url(url))
    }

    /// Creates a request from an already parsed URL.
    pub fn from_url(url: Url) -> Self {
        let key = CacheKey::new(url.as_str(), None);
        Self {
            url,
            key,
            transformation: None,
            metadata: None,
            flags: Flags::default(),
        }
    }

    /// Returns the URL to load.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the cache key, derived from the URL and transformation.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Returns the transformation, if any.
    pub fn transformation(&self) -> Option<&Arc<dyn Transformation>> {
        self.transformation.as_ref()
    }

    /// Returns the cached metadata hint, if any.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Returns the flags.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Returns a copy that applies `transformation`.
    pub fn with_transformation(&self, transformation: Arc<dyn Transformation>) -> Self {
        let key = CacheKey::new(self.url.as_str(), Some(transformation.identifier()));
        Self {
            key,
            transformation: Some(transformation),
            ..self.clone()
        }
    }

    /// Returns a copy without any transformation.
    pub fn without_transformation(&self) -> Self {
        Self {
            key: self.key.without_transformation(),
            transformation: None,
            ..self.clone()
        }
    }

    /// Returns a copy carrying `metadata`, which makes the network stage
    /// issue a conditional request.
    pub fn with_metadata(&self, metadata: Metadata) -> Self {
        Self {
            metadata: Some(metadata),
            ..self.clone()
        }
    }

    /// Returns a copy with different flags.
    pub fn with_flags(&self, flags: Flags) -> Self {
        Self {
            flags,
            ..self.clone()
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("key", &self.key)
            .field("metadata", &self.metadata)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}
