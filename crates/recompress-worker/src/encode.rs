//! The isolated encode executor.
//!
//! Each job runs inside `tokio::task::spawn_blocking`, so the driver
//! loop keeps handling inputs while an encode is in progress. The job
//! owns everything it touches: a shared handle to its input image, the
//! codec, and its own RNG seeded from the worker's.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use recompress_pipeline::{Codec, EncodeError, EncodeJob, EncodeResult, ImageCodec, executor};
use tokio::task::{JoinError, JoinHandle};
use tracing::debug;

/// Runs [`EncodeJob`]s off the async runtime.
pub struct EncodeWorker {
    codec: Arc<dyn Codec>,
    rng: StdRng,
}

impl EncodeWorker {
    /// A worker using `codec`. With `seed`, the sequence of sampled
    /// qualities and formats is reproducible.
    #[must_use]
    pub fn new(codec: Arc<dyn Codec>, seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        Self { codec, rng }
    }

    /// Start `job` on the blocking pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&mut self, job: EncodeJob) -> JoinHandle<EncodeResult> {
        let codec = Arc::clone(&self.codec);
        let seed: u64 = self.rng.random();
        let (width, height) = job.image.dimensions();
        debug!(
            "dispatching {width}×{height} at quality {} as {}",
            job.quality, job.format
        );
        tokio::task::spawn_blocking(move || {
            let mut rng = StdRng::seed_from_u64(seed);
            executor::encode(&job, codec.as_ref(), &mut rng)
        })
    }

    /// Run `job` to completion.
    pub async fn run(&mut self, job: EncodeJob) -> EncodeResult {
        self.dispatch(job).await.unwrap_or_else(join_failure)
    }
}

impl Default for EncodeWorker {
    fn default() -> Self {
        Self::new(Arc::new(ImageCodec), None)
    }
}

impl std::fmt::Debug for EncodeWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodeWorker").finish_non_exhaustive()
    }
}

/// A job that panicked (or was cancelled by runtime shutdown) is an
/// ordinary failed iteration.
#[allow(clippy::needless_pass_by_value)]
pub(crate) fn join_failure(error: JoinError) -> EncodeResult {
    Err(EncodeError::Worker(format!("encode task panicked: {error}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use recompress_pipeline::{Format, ImageFormat, QualityRange, RgbaImage};

    use super::*;

    struct PanickingCodec;

    impl Codec for PanickingCodec {
        fn encode(
            &self,
            _image: &RgbaImage,
            _format: ImageFormat,
            _quality: f64,
        ) -> Result<Vec<u8>, EncodeError> {
            panic!("codec blew up");
        }
    }

    fn job(format: Format) -> EncodeJob {
        EncodeJob {
            image: Arc::new(RgbaImage::new(16, 16)),
            quality: QualityRange::new(0.4, 0.6).unwrap(),
            format,
        }
    }

    #[tokio::test]
    async fn runs_a_real_encode() {
        let mut worker = EncodeWorker::default();
        let frame = worker.run(job(Format::Webp)).await.unwrap();
        assert_eq!(frame.format, ImageFormat::Webp);
        assert!((0.4..=0.6).contains(&frame.quality));
        assert!(!frame.bytes.is_empty());
    }

    #[tokio::test]
    async fn same_seed_samples_the_same_qualities() {
        let mut a = EncodeWorker::new(Arc::new(ImageCodec), Some(42));
        let mut b = EncodeWorker::new(Arc::new(ImageCodec), Some(42));
        for _ in 0..5 {
            let qa = a.run(job(Format::Random)).await.unwrap();
            let qb = b.run(job(Format::Random)).await.unwrap();
            assert!((qa.quality - qb.quality).abs() < f64::EPSILON);
            assert_eq!(qa.format, qb.format);
        }
    }

    #[tokio::test]
    async fn panic_in_codec_becomes_a_worker_error() {
        let mut worker = EncodeWorker::new(Arc::new(PanickingCodec), Some(1));
        let result = worker.run(job(Format::Jpeg)).await;
        assert!(matches!(result, Err(EncodeError::Worker(_))));
    }
}
