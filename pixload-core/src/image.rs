//! Decoded images and the codec boundary.
//!
//! The runtime never looks inside a decoded image. It only needs two things
//! from it: its in-memory byte size (for cache accounting) and the ability to
//! hand it to a codec for encoding. Decoded images are therefore modelled as
//! a trait object, [`Image`], produced and consumed by an [`ImageCodec`].
//!
//! ```
//! use std::sync::Arc;
//! use pixload_core::{Bitmap, Image};
//!
//! #[derive(Debug)]
//! struct Pixels(Vec<u8>);
//!
//! impl Bitmap for Pixels {
//!     fn byte_size(&self) -> usize {
//!         self.0.len()
//!     }
//! }
//!
//! let image: Image = Arc::new(Pixels(vec![0; 64]));
//! assert_eq!(image.byte_size(), 64);
//! assert!(pixload_core::image::downcast::<Pixels>(&image).is_some());
//! ```

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use thiserror::Error;

/// A decoded image as seen by the caches.
pub trait Bitmap: Any + Send + Sync + Debug {
    /// Number of bytes the decoded pixels occupy in memory.
    fn byte_size(&self) -> usize;
}

/// Shared handle to a decoded image.
pub type Image = Arc<dyn Bitmap>;

/// Returns the concrete bitmap behind `image` if it has type `T`.
pub fn downcast<T: Bitmap>(image: &Image) -> Option<&T> {
    let any: &dyn Any = image.as_ref();
    any.downcast_ref::<T>()
}

/// Compressed output formats supported when writing decoded images back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// JPEG, the fallback for unknown content types.
    Jpeg,
    /// PNG.
    Png,
    /// WebP.
    Webp,
}

impl ImageFormat {
    /// Picks an output format for the given content type.
    ///
    /// PNG and WebP are recognised, everything else maps to JPEG.
    pub fn from_content_type(content_type: &str) -> Self {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => ImageFormat::Png,
            "image/webp" => ImageFormat::Webp,
            _ => ImageFormat::Jpeg,
        }
    }

    /// Returns the MIME content type of the format.
    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
        }
    }
}

/// Errors returned by an [`ImageCodec`].
#[derive(Debug, Error)]
pub enum CodecError {
    /// Reading the encoded data failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The codec does not handle this format.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// The codec rejected the data.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl CodecError {
    /// Wraps an arbitrary codec failure.
    pub fn other<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        CodecError::Other(error.into())
    }
}

/// Converts between encoded bytes and decoded images.
///
/// Both operations are synchronous and CPU bound. The runtime calls them on
/// its worker pools, never on the callback thread.
pub trait ImageCodec: Send + Sync {
    /// Decodes compressed image data.
    fn decode(&self, data: &[u8]) -> Result<Image, CodecError>;

    /// Encodes a decoded image. `quality` is in `0..=100` and only used by
    /// lossy formats.
    fn encode(
        &self,
        image: &Image,
        format: ImageFormat,
        quality: u8,
    ) -> Result<Vec<u8>, CodecError>;
}

impl<T: ImageCodec + ?Sized> ImageCodec for Arc<T> {
    fn decode(&self, data: &[u8]) -> Result<Image, CodecError> {
        self.as_ref().decode(data)
    }

    fn encode(
        &self,
        image: &Image,
        format: ImageFormat,
        quality: u8,
    ) -> Result<Vec<u8>, CodecError> {
        self.as_ref().encode(image, format, quality)
    }
}
