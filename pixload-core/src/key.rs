//! Cache key type.
//!
//! A [`CacheKey`] identifies a fetchable resource: the source URL plus the
//! identifier of the transformation applied to it, if any. Two requests are
//! cache-equivalent iff their keys are equal.
//!
//! ## Format
//!
//! When displayed, keys follow this format:
//! `{url}` or `{url}#{transformation}`
//!
//! ```
//! use pixload_core::CacheKey;
//!
//! let plain = CacheKey::new("https://example.com/a.png", None);
//! assert_eq!(plain.to_string(), "https://example.com/a.png");
//!
//! let scaled = CacheKey::new("https://example.com/a.png", Some("scale:64x64"));
//! assert_eq!(scaled.to_string(), "https://example.com/a.png#scale:64x64");
//! assert_ne!(plain, scaled);
//! assert_eq!(scaled.without_transformation(), plain);
//! ```
//!
//! ## Performance
//!
//! [`CacheKey`] uses `Arc` internally for cheap cloning - keys travel through
//! every stage of a loader chain and into both tracking tables, so copying a
//! key only increments a reference count.

use smol_str::SmolStr;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Inner structure containing the actual cache key data.
/// Wrapped in Arc for cheap cloning.
#[derive(Debug, Eq, PartialEq, Hash)]
struct CacheKeyInner {
    url: Box<str>,
    transformation: Option<SmolStr>,
}

/// Deterministic identity of a fetchable resource.
///
/// Keys are immutable. Derived variants such as
/// [`without_transformation`](Self::without_transformation) are new keys.
#[derive(Clone, Debug)]
pub struct CacheKey {
    inner: Arc<CacheKeyInner>,
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        // Fast path: same Arc pointer
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner == other.inner
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.url)?;
        if let Some(ref transformation) = self.inner.transformation {
            write!(f, "#{}", transformation)?;
        }
        Ok(())
    }
}

impl CacheKey {
    /// Creates a key from a URL and an optional transformation identifier.
    pub fn new(url: impl AsRef<str>, transformation: Option<&str>) -> Self {
        CacheKey {
            inner: Arc::new(CacheKeyInner {
                url: url.as_ref().into(),
                transformation: transformation.map(SmolStr::new),
            }),
        }
    }

    /// Returns the source URL part of the key.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Returns the transformation identifier, if any.
    pub fn transformation(&self) -> Option<&str> {
        self.inner.transformation.as_deref()
    }

    /// Returns `true` if the key identifies a transformed resource.
    pub fn is_transformed(&self) -> bool {
        self.inner.transformation.is_some()
    }

    /// Returns the key of the untransformed source resource.
    ///
    /// Returns a clone of `self` when the key carries no transformation.
    pub fn without_transformation(&self) -> Self {
        if self.inner.transformation.is_none() {
            return self.clone();
        }
        CacheKey::new(&*self.inner.url, None)
    }

    /// Returns the estimated memory usage of this cache key in bytes.
    pub fn memory_size(&self) -> usize {
        use std::mem::size_of;

        let arc_overhead = 2 * size_of::<usize>() + size_of::<CacheKeyInner>();
        let transformation = self
            .inner
            .transformation
            .as_ref()
            .map_or(0, |t| t.len().saturating_sub(23));

        arc_overhead + self.inner.url.len() + transformation
    }
}
