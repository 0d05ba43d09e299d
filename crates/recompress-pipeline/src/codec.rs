//! Lossy encoders for the concrete output formats, and decoding of
//! their output back into raster form.
//!
//! JPEG goes through the `image` crate. `image` only writes lossless
//! `WebP`, so lossy `WebP` goes through libwebp via the `webp` crate.
//! Decoding uses `image` for both.

use image::buffer::ConvertBuffer;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage, RgbaImage};

use crate::types::{EncodeError, ImageFormat};

/// Encodes one raster image at one quality.
///
/// Implementations must be stateless with respect to the caller: the
/// executor may call them from any thread, one job at a time.
pub trait Codec: Send + Sync {
    /// Encode `image` as `format` at `quality` (`0.0..=1.0`).
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::Encode`] if the encoder rejects the input.
    fn encode(
        &self,
        image: &RgbaImage,
        format: ImageFormat,
        quality: f64,
    ) -> Result<Vec<u8>, EncodeError>;
}

/// The production codec: JPEG via `image`, lossy `WebP` via libwebp.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec;

impl Codec for ImageCodec {
    fn encode(
        &self,
        image: &RgbaImage,
        format: ImageFormat,
        quality: f64,
    ) -> Result<Vec<u8>, EncodeError> {
        match format {
            ImageFormat::Jpeg => encode_jpeg(image, quality),
            ImageFormat::Webp => encode_webp(image, quality),
        }
    }
}

/// Encode as baseline JPEG.
///
/// JPEG has no alpha channel, so the image is flattened to RGB first.
///
/// # Errors
///
/// Returns [`EncodeError::Encode`] if the JPEG encoder fails.
pub fn encode_jpeg(image: &RgbaImage, quality: f64) -> Result<Vec<u8>, EncodeError> {
    let rgb: RgbImage = image.convert();
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, jpeg_quality(quality));
    encoder
        .write_image(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| EncodeError::Encode {
            format: ImageFormat::Jpeg,
            reason: e.to_string(),
        })?;
    Ok(buf)
}

/// Encode as lossy `WebP`.
///
/// # Errors
///
/// Returns [`EncodeError::Encode`] for empty images or if libwebp
/// reports an error.
pub fn encode_webp(image: &RgbaImage, quality: f64) -> Result<Vec<u8>, EncodeError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(EncodeError::Encode {
            format: ImageFormat::Webp,
            reason: "image has no pixels".to_string(),
        });
    }
    let encoder = webp::Encoder::from_rgba(image.as_raw(), image.width(), image.height());
    let memory = encoder
        .encode_simple(false, webp_quality(quality))
        .map_err(|e| EncodeError::Encode {
            format: ImageFormat::Webp,
            reason: format!("{e:?}"),
        })?;
    Ok(memory.to_vec())
}

/// Decode encoded image bytes (format sniffed from the header).
///
/// # Errors
///
/// Returns [`EncodeError::Decode`] if the bytes are not a recognised
/// image.
pub fn decode(bytes: &[u8]) -> Result<RgbaImage, EncodeError> {
    if bytes.is_empty() {
        return Err(EncodeError::Decode("buffer is empty".to_string()));
    }
    image::load_from_memory(bytes)
        .map(image::DynamicImage::into_rgba8)
        .map_err(|e| EncodeError::Decode(e.to_string()))
}

/// Map a unit quality to the JPEG encoder's `1..=100` scale.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn jpeg_quality(quality: f64) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Map a unit quality to libwebp's `0.0..=100.0` scale.
#[allow(clippy::cast_possible_truncation)]
fn webp_quality(quality: f64) -> f32 {
    (quality * 100.0).clamp(0.0, 100.0) as f32
}
