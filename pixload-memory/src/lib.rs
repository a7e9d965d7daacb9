#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod builder;
mod cache;
pub mod metrics;

pub use builder::MemoryCacheBuilder;
pub use cache::{CacheStats, CachedImage, MemoryCache};
