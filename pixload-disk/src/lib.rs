#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod cache;
mod error;
mod journal;

pub use cache::{DiskCache, DiskCacheBuilder, Editor, Snapshot};
pub use error::DiskCacheError;

/// Number of values stored per entry.
pub const VALUE_COUNT: usize = 2;

/// Index of the encoded image bytes.
pub const IMAGE_INDEX: usize = 0;

/// Index of the encoded [`Metadata`](pixload_core::Metadata).
pub const METADATA_INDEX: usize = 1;

/// Schema version used when none is configured. Bump it whenever the layout
/// of stored values changes.
pub const DEFAULT_APP_VERSION: u32 = 2;
