//! [`ImageCodec`] backed by the `image` crate.

use std::io::Cursor;

use ::image::DynamicImage;
use ::image::codecs::jpeg::JpegEncoder;

use crate::image::{Bitmap, CodecError, Image, ImageCodec, ImageFormat, downcast};

/// A decoded image produced by [`RasterCodec`].
#[derive(Debug, Clone)]
pub struct RasterImage(DynamicImage);

impl RasterImage {
    /// Wraps a decoded image.
    pub fn new(image: DynamicImage) -> Self {
        Self(image)
    }

    /// Returns the decoded pixels.
    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.0
    }
}

impl Bitmap for RasterImage {
    fn byte_size(&self) -> usize {
        self.0.as_bytes().len()
    }
}

/// Decodes PNG, JPEG and WebP and encodes to the same formats.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterCodec;

impl ImageCodec for RasterCodec {
    fn decode(&self, data: &[u8]) -> Result<Image, CodecError> {
        let decoded = ::image::load_from_memory(data).map_err(CodecError::other)?;
        Ok(std::sync::Arc::new(RasterImage(decoded)))
    }

    fn encode(
        &self,
        image: &Image,
        format: ImageFormat,
        quality: u8,
    ) -> Result<Vec<u8>, CodecError> {
        let raster = downcast::<RasterImage>(image).ok_or_else(|| {
            CodecError::UnsupportedFormat(format!("{image:?} is not a raster image"))
        })?;

        let mut out = Vec::new();
        match format {
            ImageFormat::Jpeg => {
                // JPEG has no alpha channel
                let rgb = raster.0.to_rgb8();
                JpegEncoder::new_with_quality(&mut out, quality.min(100))
                    .encode_image(&rgb)
                    .map_err(CodecError::other)?;
            }
            ImageFormat::Png => raster
                .0
                .write_to(&mut Cursor::new(&mut out), ::image::ImageFormat::Png)
                .map_err(CodecError::other)?,
            ImageFormat::Webp => raster
                .0
                .write_to(&mut Cursor::new(&mut out), ::image::ImageFormat::WebP)
                .map_err(CodecError::other)?,
        }
        Ok(out)
    }
}
