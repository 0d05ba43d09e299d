//! Feedback state: the original image, the latest compressed image,
//! and the iteration record.
//!
//! The only writer is the [`Driver`](crate::Driver). Everything else
//! reads through [`FeedbackState::display`] and
//! [`FeedbackState::record`].

use std::sync::Arc;

use crate::codec;
use crate::types::{EncodeError, IterationRecord, RgbaImage};

/// The images shown by the comparison view.
#[derive(Debug, Clone, Default)]
pub struct DisplayImages {
    /// The loaded (possibly downscaled) source image.
    pub original: Option<Arc<RgbaImage>>,
    /// The decoded output of the most recent applied iteration.
    pub compressed: Option<Arc<RgbaImage>>,
}

/// Images and progress shared between iterations.
#[derive(Debug, Clone, Default)]
pub struct FeedbackState {
    original: Option<Arc<RgbaImage>>,
    compressed: Option<Arc<RgbaImage>>,
    record: IterationRecord,
}

impl FeedbackState {
    /// Empty state: no image loaded yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the source image.
    ///
    /// Clears the compressed image and the iteration record, exactly
    /// like [`clear`](Self::clear).
    pub fn set_original(&mut self, image: RgbaImage) {
        self.original = Some(Arc::new(image));
        self.clear();
    }

    /// Decode an encoded result and make it the latest compressed
    /// image, bumping the count and recording `quality`.
    ///
    /// Callers must only pass results that are known not to be stale.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::Decode`] if `bytes` cannot be decoded;
    /// the state is left untouched in that case.
    pub fn apply_result(
        &mut self,
        bytes: &[u8],
        quality: f64,
    ) -> Result<IterationRecord, EncodeError> {
        let decoded = codec::decode(bytes)?;
        self.compressed = Some(Arc::new(decoded));
        self.record.count += 1;
        self.record.last_quality = Some(quality);
        Ok(self.record)
    }

    /// Drop the compressed image and zero the record. The original
    /// image is kept.
    pub fn clear(&mut self) {
        self.compressed = None;
        self.record = IterationRecord::default();
    }

    /// The input for the next iteration: the latest compressed image,
    /// or the original if no iteration has been applied since the last
    /// reset. `None` until an original is set.
    #[must_use]
    pub fn current_image(&self) -> Option<&Arc<RgbaImage>> {
        self.compressed.as_ref().or(self.original.as_ref())
    }

    /// The original image, if loaded.
    #[must_use]
    pub const fn original(&self) -> Option<&Arc<RgbaImage>> {
        self.original.as_ref()
    }

    /// The latest compressed image, if any iteration has been applied.
    #[must_use]
    pub const fn compressed(&self) -> Option<&Arc<RgbaImage>> {
        self.compressed.as_ref()
    }

    /// Both images for the comparison view.
    #[must_use]
    pub fn display(&self) -> DisplayImages {
        DisplayImages {
            original: self.original.clone(),
            compressed: self.compressed.clone(),
        }
    }

    /// Count and last quality since the last reset.
    #[must_use]
    pub const fn record(&self) -> IterationRecord {
        self.record
    }
}
