#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod builder;

/// Serializable configuration.
///
/// [`LoaderConfig`] mirrors the builder and deserializes from YAML or any
/// other serde format, with human-readable sizes and durations.
pub mod config;

/// Callback delivery.
///
/// Results reach [`ImageListener`]s through a [`CallbackExecutor`]: by
/// default a dedicated [`ThreadExecutor`], or the host's UI loop.
pub mod dispatch;

mod error;
mod image_loader;

/// The loader chain and its stages.
///
/// See [`Loader`](loader::Loader) and [`Manager`](loader::Manager) for
/// writing stages.
pub mod loader;

mod manager;

/// Metrics collection.
///
/// When the `metrics` feature is enabled, this module provides counters for
/// requests, coalesced loads, cancellations, disk lookups, network fetches
/// and errors, plus a load duration histogram.
pub mod metrics;

mod pending;
mod pool;
mod tag;

pub use builder::ImageLoaderBuilder;
pub use config::LoaderConfig;
pub use dispatch::{CallbackExecutor, ImageListener, InlineExecutor, ThreadExecutor};
pub use error::{BuildError, LoadError};
pub use image_loader::ImageLoader;
pub use pool::{DEFAULT_NETWORK_THREADS, WorkerPool};
pub use tag::{Tag, TagHandle};

pub use pixload_core::{
    Bitmap, ByteSource, CacheKey, CodecError, Expiry, Flags, Image, ImageCodec, ImageFormat,
    Metadata, Request, RequestError, Transformation,
};
pub use pixload_http::{Connector, MaxAgeOverride};

/// The `pixload` prelude.
///
/// ```rust
/// use pixload::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{ImageListener, ImageLoader, LoadError, Request, Tag, Transformation};
}
