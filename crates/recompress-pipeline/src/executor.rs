//! The compression executor: one job in, one [`EncodeResult`] out.
//!
//! [`encode`] is a pure function of its job, codec and random source.
//! It never touches feedback state and never panics on codec failure;
//! errors come back through the same result value as successes so the
//! driver has a single handling path. Callers run it in an isolated
//! execution context so a slow encode cannot stall scheduling.

use rand::Rng;
use web_time::Instant;

use crate::codec::Codec;
use crate::types::{EncodeJob, EncodeResult, EncodedFrame};

/// Run one encode job.
///
/// Samples the quality uniformly from the job's range and resolves
/// the job's format exactly once each, then re-encodes the image as
/// is: no resizing or filtering happens here.
///
/// # Errors
///
/// Returns whatever [`EncodeError`](crate::EncodeError) the codec
/// reports.
pub fn encode<R: Rng + ?Sized>(job: &EncodeJob, codec: &dyn Codec, rng: &mut R) -> EncodeResult {
    let quality = job.quality.sample(rng);
    let format = job.format.resolve(rng);

    let start = Instant::now();
    let bytes = codec.encode(&job.image, format, quality)?;

    Ok(EncodedFrame {
        bytes,
        quality,
        format,
        elapsed: start.elapsed(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::codec::{ImageCodec, decode};
    use crate::types::{EncodeError, Format, ImageFormat, QualityRange, RgbaImage};

    /// Skips encoding entirely; every call returns a one-byte payload.
    struct NullCodec;

    impl Codec for NullCodec {
        fn encode(
            &self,
            _image: &RgbaImage,
            _format: ImageFormat,
            _quality: f64,
        ) -> Result<Vec<u8>, EncodeError> {
            Ok(vec![0])
        }
    }

    struct RejectingCodec {
        calls: AtomicUsize,
    }

    impl Codec for RejectingCodec {
        fn encode(
            &self,
            _image: &RgbaImage,
            format: ImageFormat,
            _quality: f64,
        ) -> Result<Vec<u8>, EncodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EncodeError::Encode {
                format,
                reason: "unsupported".to_string(),
            })
        }
    }

    fn solid_job(format: Format, min: f64, max: f64) -> EncodeJob {
        EncodeJob {
            image: Arc::new(RgbaImage::from_pixel(
                12,
                10,
                image::Rgba([200, 120, 40, 255]),
            )),
            quality: QualityRange::new(min, max).unwrap(),
            format,
        }
    }

    #[test]
    fn sampled_qualities_stay_within_range() {
        let job = solid_job(Format::Jpeg, 0.3, 0.8);
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..10_000 {
            let frame = encode(&job, &NullCodec, &mut rng).unwrap();
            assert!(
                (0.3..=0.8).contains(&frame.quality),
                "quality {} out of range",
                frame.quality,
            );
        }
    }

    #[test]
    fn degenerate_range_returns_the_constant() {
        let job = solid_job(Format::Jpeg, 0.6, 0.6);
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..50 {
            let frame = encode(&job, &NullCodec, &mut rng).unwrap();
            assert!((frame.quality - 0.6).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn random_format_is_chosen_per_call() {
        let job = solid_job(Format::Random, 0.3, 0.8);
        let mut rng = StdRng::seed_from_u64(99);
        let formats: Vec<ImageFormat> = (0..1_000)
            .map(|_| encode(&job, &NullCodec, &mut rng).unwrap().format)
            .collect();

        let jpeg = formats.iter().filter(|f| **f == ImageFormat::Jpeg).count();
        let webp = formats.len() - jpeg;
        assert!(jpeg > 0 && webp > 0, "jpeg={jpeg} webp={webp}");

        // Consecutive picks must vary, not settle on one format.
        let switches = formats.windows(2).filter(|w| w[0] != w[1]).count();
        assert!(switches > 100, "only {switches} format switches in 1000 picks");
    }

    #[test]
    fn codec_failure_is_returned_as_data() {
        let codec = RejectingCodec {
            calls: AtomicUsize::new(0),
        };
        let job = solid_job(Format::Webp, 0.3, 0.8);
        let mut rng = StdRng::seed_from_u64(0);
        let result = encode(&job, &codec, &mut rng);
        assert!(matches!(
            result,
            Err(EncodeError::Encode {
                format: ImageFormat::Webp,
                ..
            })
        ));
        assert_eq!(codec.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn encoding_preserves_dimensions() {
        let mut rng = StdRng::seed_from_u64(2);
        for format in [Format::Jpeg, Format::Webp] {
            let job = solid_job(format, 0.3, 0.8);
            let frame = encode(&job, &ImageCodec, &mut rng).unwrap();
            let decoded = decode(&frame.bytes).unwrap();
            assert_eq!(decoded.dimensions(), (12, 10), "format {format}");
        }
    }
}
