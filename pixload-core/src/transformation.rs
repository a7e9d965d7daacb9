//! Caller-supplied image transformations.
//!
//! A transformation turns the untransformed resource into a new decoded
//! image. Its [`identifier`](Transformation::identifier) becomes part of the
//! [`CacheKey`](crate::CacheKey), so transformed outputs are cached
//! separately from their source and from each other.

use std::fmt::Debug;

use crate::image::{CodecError, Image, ImageCodec, ImageFormat};
use crate::source::ByteSource;

/// A pure function from an image to an image.
pub trait Transformation: Send + Sync + Debug {
    /// Stable identifier. Two transformations with the same identifier must
    /// produce the same output for the same input.
    fn identifier(&self) -> &str;

    /// Encoding the transformed image should be persisted with, if fixed.
    ///
    /// When set, the content type of the resulting metadata is rewritten to
    /// match.
    fn output_format(&self) -> Option<ImageFormat> {
        None
    }

    /// Transforms encoded bytes.
    ///
    /// The default decodes with `codec` and delegates to
    /// [`transform_image`](Self::transform_image). Override it to work on the
    /// encoded data directly, for example to decode at a reduced size.
    fn transform_source(
        &self,
        source: &ByteSource,
        codec: &dyn ImageCodec,
    ) -> Result<Option<Image>, CodecError> {
        let data = source.read_all()?;
        let image = codec.decode(&data)?;
        Ok(self.transform_image(&image))
    }

    /// Transforms an already decoded image. `None` means the transformation
    /// produced nothing, which the loader reports as an error.
    fn transform_image(&self, image: &Image) -> Option<Image>;
}
