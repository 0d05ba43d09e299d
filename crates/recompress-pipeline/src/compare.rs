//! Static render of the before/after comparison slider.
//!
//! Left of the divider shows the compressed image, right of it the
//! original. The divider is a one-pixel column drawn in difference
//! mode against white, so it stays visible on any background.

use image::{Rgba, RgbaImage};

use crate::types::PipelineError;

/// Compose `compressed` and `original` split at `position` (fraction
/// of the width, clamped to `0.0..=1.0`).
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] if the images differ
/// in size.
pub fn split_comparison(
    original: &RgbaImage,
    compressed: &RgbaImage,
    position: f64,
) -> Result<RgbaImage, PipelineError> {
    if original.dimensions() != compressed.dimensions() {
        return Err(PipelineError::DimensionMismatch {
            expected: original.dimensions(),
            actual: compressed.dimensions(),
        });
    }

    let (width, height) = original.dimensions();
    let divider = divider_column(width, position);

    let output = RgbaImage::from_fn(width, height, |x, y| {
        if x < divider {
            *compressed.get_pixel(x, y)
        } else if x == divider {
            difference(*original.get_pixel(x, y))
        } else {
            *original.get_pixel(x, y)
        }
    });
    Ok(output)
}

/// Column index of the divider. Equal to `width` (off-image) when the
/// slider sits at the far right.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn divider_column(width: u32, position: f64) -> u32 {
    let position = if position.is_nan() {
        0.5
    } else {
        position.clamp(0.0, 1.0)
    };
    ((f64::from(width) * position).round() as u32).min(width)
}

/// White blended in difference mode: each colour channel inverted,
/// alpha kept.
const fn difference(pixel: Rgba<u8>) -> Rgba<u8> {
    let [r, g, b, a] = pixel.0;
    Rgba([255 - r, 255 - g, 255 - b, a])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]))
    }

    #[test]
    fn halves_come_from_the_right_sources() {
        let original = solid(10, 4, 200);
        let compressed = solid(10, 4, 20);
        let out = split_comparison(&original, &compressed, 0.5).unwrap();

        assert_eq!(out.get_pixel(0, 0).0, [20, 20, 20, 255]);
        assert_eq!(out.get_pixel(4, 3).0, [20, 20, 20, 255]);
        assert_eq!(out.get_pixel(5, 0).0, [55, 55, 55, 255], "divider inverts");
        assert_eq!(out.get_pixel(9, 2).0, [200, 200, 200, 255]);
    }

    #[test]
    fn position_zero_shows_only_original_and_divider() {
        let original = solid(6, 2, 100);
        let compressed = solid(6, 2, 0);
        let out = split_comparison(&original, &compressed, 0.0).unwrap();
        assert_eq!(out.get_pixel(0, 0).0, [155, 155, 155, 255]);
        for x in 1..6 {
            assert_eq!(out.get_pixel(x, 1).0, [100, 100, 100, 255]);
        }
    }

    #[test]
    fn position_one_shows_only_compressed() {
        let original = solid(6, 2, 100);
        let compressed = solid(6, 2, 7);
        let out = split_comparison(&original, &compressed, 1.0).unwrap();
        for pixel in out.pixels() {
            assert_eq!(pixel.0, [7, 7, 7, 255]);
        }
    }

    #[test]
    fn out_of_range_positions_are_clamped() {
        assert_eq!(divider_column(100, -3.0), 0);
        assert_eq!(divider_column(100, 7.0), 100);
        assert_eq!(divider_column(100, f64::NAN), 50);
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let result = split_comparison(&solid(4, 4, 0), &solid(4, 5, 0), 0.5);
        assert!(matches!(
            result,
            Err(PipelineError::DimensionMismatch {
                expected: (4, 4),
                actual: (4, 5),
            })
        ));
    }
}
