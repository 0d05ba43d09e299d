//! One-time image load: decode, then fit to a maximum width.
//!
//! Only the width is constrained. Tall images keep their full height.

use image::RgbaImage;
use image::imageops::FilterType;

use crate::types::PipelineError;

/// Decode raw image bytes (PNG, JPEG, BMP, WebP) to RGBA and
/// downscale so the width is at most `max_width`.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn load_image(bytes: &[u8], max_width: u32) -> Result<RgbaImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let decoded = image::load_from_memory(bytes)?;
    Ok(fit_width(decoded.into_rgba8(), max_width))
}

/// Downscale `image` to `max_width` preserving aspect ratio.
///
/// Images already at or below `max_width` (and any image when
/// `max_width` is zero) are returned unchanged.
#[must_use]
pub fn fit_width(image: RgbaImage, max_width: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    if max_width == 0 || width <= max_width {
        return image;
    }
    let new_height = scaled_height(width, height, max_width);
    image::imageops::resize(&image, max_width, new_height, FilterType::Triangle)
}

/// `height * max_width / width`, rounded, never below 1.
fn scaled_height(width: u32, height: u32, max_width: u32) -> u32 {
    let width = u64::from(width);
    let scaled = (u64::from(height) * u64::from(max_width) + width / 2) / width;
    u32::try_from(scaled.max(1)).unwrap_or(u32::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, image::Rgba([90, 120, 150, 255]));
        let mut buf = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buf);
        image::ImageEncoder::write_image(
            encoder,
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgba8,
        )
        .unwrap();
        buf
    }

    #[test]
    fn empty_input_returns_error() {
        assert!(matches!(load_image(&[], 1280), Err(PipelineError::EmptyInput)));
    }

    #[test]
    fn corrupt_input_returns_decode_error() {
        assert!(matches!(
            load_image(&[0xFF, 0x00, 0x12], 1280),
            Err(PipelineError::ImageDecode(_))
        ));
    }

    #[test]
    fn narrow_image_is_unchanged() {
        let img = load_image(&png_bytes(40, 30), 1280).unwrap();
        assert_eq!(img.dimensions(), (40, 30));
        assert_eq!(img.get_pixel(0, 0).0, [90, 120, 150, 255]);
    }

    #[test]
    fn exact_width_is_unchanged() {
        let img = load_image(&png_bytes(64, 20), 64).unwrap();
        assert_eq!(img.dimensions(), (64, 20));
    }

    #[test]
    fn wide_image_is_scaled_to_max_width() {
        let img = load_image(&png_bytes(200, 100), 50).unwrap();
        assert_eq!(img.dimensions(), (50, 25));
    }

    #[test]
    fn tall_image_only_width_is_constrained() {
        let img = fit_width(RgbaImage::new(100, 1000), 200);
        assert_eq!(img.dimensions(), (100, 1000));
    }

    #[test]
    fn scaled_height_rounds_and_never_hits_zero() {
        assert_eq!(scaled_height(2560, 1440, 1280), 720);
        assert_eq!(scaled_height(3, 2, 2), 1);
        assert_eq!(scaled_height(10_000, 1, 10), 1);
    }
}
