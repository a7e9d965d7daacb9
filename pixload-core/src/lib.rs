#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! # pixload-core
//!
//! Core types for the pixload image loading runtime.
//!
//! This crate holds the vocabulary shared by every other pixload crate and
//! contains no I/O scheduling of its own:
//!
//! - [`CacheKey`] - identity of a fetchable resource (URL + transformation)
//! - [`Request`] and [`Flags`] - what to load and how caches may be used
//! - [`Metadata`] and [`Expiry`] - freshness information and its wire format
//! - [`ByteSource`] - lazily openable encoded bytes
//! - [`Bitmap`], [`Image`] and [`ImageCodec`] - the decoded-image boundary
//! - [`Transformation`] - caller-supplied image transformations
//!
//! ## Feature Flags
//!
//! - `image` - Provide [`RasterCodec`], an [`ImageCodec`] built on the
//!   `image` crate (PNG, JPEG, WebP)

pub mod image;
pub mod key;
pub mod metadata;
#[cfg(feature = "image")]
#[cfg_attr(docsrs, doc(cfg(feature = "image")))]
pub mod raster;
pub mod request;
pub mod source;
pub mod transformation;

pub use crate::image::{Bitmap, CodecError, Image, ImageCodec, ImageFormat};
pub use key::CacheKey;
pub use metadata::{Expiry, Metadata, MetadataError};
#[cfg(feature = "image")]
pub use raster::{RasterCodec, RasterImage};
pub use request::{Flags, Request, RequestError};
pub use source::ByteSource;
pub use transformation::Transformation;
#[doc(hidden)]
pub use smol_str::SmolStr;
