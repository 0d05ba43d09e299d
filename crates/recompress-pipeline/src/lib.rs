//! recompress-pipeline: Pure iterative recompression core (sans-IO).
//!
//! Re-encodes an image at a randomly sampled lossy quality, feeds the
//! decoded output back in as the next input, and repeats, so that
//! compression artifacts pile up over time.
//!
//! This crate has **no I/O or async runtime dependencies**. The
//! [`Driver`] is an event-in / command-out state machine; the
//! [`executor`] is a pure function. Scheduling, threads and logging
//! live in `recompress-worker`.
//!
//! # One iteration
//!
//! 1. The driver's timer fires and it emits
//!    [`Command::Dispatch`] with the current image
//!    (latest compressed, else original).
//! 2. The host runs [`executor::encode`] in an isolated context: one
//!    quality sample, one format resolution, one lossy encode.
//! 3. The host passes the [`EncodeResult`] to
//!    [`Driver::job_completed`], which discards it if a reset happened
//!    meanwhile, otherwise applies it (success) or reports it (failure)
//!    and arms the next timer.

pub mod cancel;
pub mod codec;
pub mod compare;
pub mod driver;
pub mod executor;
pub mod feedback;
pub mod load;
pub mod types;

pub use cancel::CancellationToken;
pub use codec::{Codec, ImageCodec};
pub use driver::{Command, Completion, DiscardReason, Driver, DriverState, JobOutcome};
pub use feedback::{DisplayImages, FeedbackState};
pub use types::{
    EncodeError, EncodeJob, EncodeResult, EncodedFrame, Format, ImageFormat, IterationRecord,
    PipelineError, QualityRange, RecompressConfig, RgbaImage,
};
