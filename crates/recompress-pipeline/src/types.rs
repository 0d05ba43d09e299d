//! Shared types for the recompress pipeline.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Re-export `RgbaImage` so downstream crates can hold raster data
/// without depending on `image` directly.
pub use image::RgbaImage;

/// Inclusive range of lossy quality values, each in `0.0..=1.0`.
///
/// Constructed through [`QualityRange::new`], which rejects
/// non-finite values, values outside the unit interval, and
/// `min > max`. Serialized as a two-element array `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 2]", into = "[f64; 2]")]
pub struct QualityRange {
    min: f64,
    max: f64,
}

impl QualityRange {
    /// The range used when none is configured.
    pub const DEFAULT: Self = Self {
        min: RecompressConfig::DEFAULT_MIN_QUALITY,
        max: RecompressConfig::DEFAULT_MAX_QUALITY,
    };

    /// Create a validated quality range.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] unless
    /// `0.0 <= min <= max <= 1.0`.
    pub fn new(min: f64, max: f64) -> Result<Self, PipelineError> {
        if !min.is_finite() || !max.is_finite() {
            return Err(PipelineError::InvalidConfig(format!(
                "quality bounds must be finite, got [{min}, {max}]"
            )));
        }
        if !(0.0..=1.0).contains(&min) || !(0.0..=1.0).contains(&max) {
            return Err(PipelineError::InvalidConfig(format!(
                "quality bounds must lie in [0, 1], got [{min}, {max}]"
            )));
        }
        if min > max {
            return Err(PipelineError::InvalidConfig(format!(
                "minimum quality {min} exceeds maximum quality {max}"
            )));
        }
        Ok(Self { min, max })
    }

    /// Lower bound (inclusive).
    #[must_use]
    pub const fn min(self) -> f64 {
        self.min
    }

    /// Upper bound (inclusive).
    #[must_use]
    pub const fn max(self) -> f64 {
        self.max
    }

    /// Returns `true` if `quality` lies within the range.
    #[must_use]
    pub fn contains(self, quality: f64) -> bool {
        (self.min..=self.max).contains(&quality)
    }

    /// Draw one quality value uniformly from `[min, max]`.
    ///
    /// A degenerate range (`min == max`) always yields `min` exactly.
    pub fn sample<R: Rng + ?Sized>(self, rng: &mut R) -> f64 {
        if self.max - self.min <= 0.0 {
            return self.min;
        }
        rng.random_range(self.min..=self.max)
    }
}

impl Default for QualityRange {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<[f64; 2]> for QualityRange {
    type Error = PipelineError;

    fn try_from([min, max]: [f64; 2]) -> Result<Self, Self::Error> {
        Self::new(min, max)
    }
}

impl From<QualityRange> for [f64; 2] {
    fn from(range: QualityRange) -> Self {
        [range.min, range.max]
    }
}

impl fmt::Display for QualityRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.2}, {:.2}]", self.min, self.max)
    }
}

/// A concrete lossy output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Baseline JPEG.
    Jpeg,
    /// Lossy `WebP` (VP8).
    Webp,
}

impl ImageFormat {
    /// Conventional file extension, without the dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jpeg => f.write_str("jpeg"),
            Self::Webp => f.write_str("webp"),
        }
    }
}

/// Output format selection, possibly randomised per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Always JPEG.
    #[default]
    Jpeg,
    /// Always lossy `WebP`.
    Webp,
    /// A fresh coin flip between JPEG and `WebP` for every job.
    Random,
}

impl Format {
    /// Resolve to a concrete format.
    ///
    /// Must be called once per job so that [`Format::Random`] picks
    /// independently on every iteration.
    pub fn resolve<R: Rng + ?Sized>(self, rng: &mut R) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Webp => ImageFormat::Webp,
            Self::Random => {
                if rng.random_bool(0.5) {
                    ImageFormat::Jpeg
                } else {
                    ImageFormat::Webp
                }
            }
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jpeg => f.write_str("jpeg"),
            Self::Webp => f.write_str("webp"),
            Self::Random => f.write_str("random"),
        }
    }
}

/// Progress since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Number of results applied since the last reset.
    pub count: u64,
    /// Quality sampled for the most recently applied result.
    pub last_quality: Option<f64>,
}

/// One unit of work for the compression executor.
///
/// The image is shared, never mutated: the job is immutable once
/// dispatched.
#[derive(Clone)]
pub struct EncodeJob {
    /// The image to re-encode.
    pub image: Arc<RgbaImage>,
    /// Range the quality is sampled from.
    pub quality: QualityRange,
    /// Requested format (resolved by the executor).
    pub format: Format,
}

impl fmt::Debug for EncodeJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodeJob")
            .field("image", &self.image.dimensions())
            .field("quality", &self.quality)
            .field("format", &self.format)
            .finish()
    }
}

/// Successful output of one encode.
#[derive(Clone, PartialEq)]
pub struct EncodedFrame {
    /// Encoded file bytes in `format`.
    pub bytes: Vec<u8>,
    /// The quality that was sampled for this encode.
    pub quality: f64,
    /// The concrete format the bytes are in.
    pub format: ImageFormat,
    /// Wall-clock time spent encoding.
    pub elapsed: Duration,
}

impl fmt::Debug for EncodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedFrame")
            .field("bytes", &self.bytes.len())
            .field("quality", &self.quality)
            .field("format", &self.format)
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

/// The result channel between the executor and the driver.
pub type EncodeResult = Result<EncodedFrame, EncodeError>;

/// Configuration for the recompression loop.
///
/// Missing fields take their defaults when deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecompressConfig {
    /// Range each iteration's quality is sampled from.
    pub quality: QualityRange,

    /// Output format for each iteration.
    pub format: Format,

    /// Delay between a result arriving and the next dispatch, in
    /// milliseconds.
    pub frame_interval_ms: u64,

    /// Images wider than this are downscaled on load.
    pub max_width: u32,

    /// Stop iterating once this many results have been applied.
    /// `None` iterates until disabled.
    pub iteration_limit: Option<u64>,
}

impl RecompressConfig {
    /// Default lower quality bound.
    pub const DEFAULT_MIN_QUALITY: f64 = 0.3;
    /// Default upper quality bound.
    pub const DEFAULT_MAX_QUALITY: f64 = 0.8;
    /// Default delay between iterations (roughly one 60 Hz frame).
    pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 16;
    /// Default maximum width of the loaded image.
    pub const DEFAULT_MAX_WIDTH: u32 = 1280;

    /// The frame interval as a [`Duration`].
    #[must_use]
    pub const fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Check invariants that the field types cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `max_width` is zero.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_width == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_width must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RecompressConfig {
    fn default() -> Self {
        Self {
            quality: QualityRange::DEFAULT,
            format: Format::default(),
            frame_interval_ms: Self::DEFAULT_FRAME_INTERVAL_MS,
            max_width: Self::DEFAULT_MAX_WIDTH,
            iteration_limit: None,
        }
    }
}

/// Errors from loading, configuring, or rendering.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Two images that must match in size do not.
    #[error("image dimensions differ: {expected:?} vs {actual:?}")]
    DimensionMismatch {
        /// Dimensions of the reference image.
        expected: (u32, u32),
        /// Dimensions of the other image.
        actual: (u32, u32),
    },
}

/// Errors from one encode iteration.
///
/// These travel as data through [`EncodeResult`]; the driver treats
/// every variant as non-fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// A buffer could not be interpreted as an image.
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// The encoder rejected the image or the quality.
    #[error("failed to encode {format}: {reason}")]
    Encode {
        /// The format that was being produced.
        format: ImageFormat,
        /// Encoder-provided message.
        reason: String,
    },

    /// The isolated execution context died before producing a result.
    #[error("encode worker failed: {0}")]
    Worker(String),
}
