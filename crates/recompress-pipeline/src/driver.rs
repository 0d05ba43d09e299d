//! The driver loop as a sans-IO state machine.
//!
//! The [`Driver`] owns the [`FeedbackState`] and the
//! [`CancellationToken`]. It never sleeps and never spawns anything:
//! each event method returns at most one [`Command`] for the host to
//! carry out (arm a timer, cancel it, or hand a job to the executor),
//! and the host feeds the timer expiry and the job result back in.
//!
//! ```text
//!              enable + image                 timer fired
//!   Idle  ─────────────────────▶ Scheduled ─────────────────▶ Dispatched
//!    ▲  ◀───────────────────────     ▲                            │
//!    │          disable              └────── result (enabled) ────┤
//!    └──────────────────── result (disabled / limit reached) ─────┘
//! ```
//!
//! A new timer is only armed once the previous job's result is known,
//! so at most one job is ever outstanding.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::feedback::{DisplayImages, FeedbackState};
use crate::types::{
    EncodeError, EncodeJob, EncodeResult, Format, ImageFormat, IterationRecord, QualityRange,
    RecompressConfig, RgbaImage,
};

/// Where the loop is between events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverState {
    /// Iteration is off, or there is no image yet. No timer armed.
    Idle,
    /// A timer is armed; the next job is dispatched when it fires.
    Scheduled,
    /// Exactly one job is outstanding.
    Dispatched,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Scheduled => f.write_str("scheduled"),
            Self::Dispatched => f.write_str("dispatched"),
        }
    }
}

/// Side effect requested by the driver.
#[derive(Debug, Clone)]
pub enum Command {
    /// Call [`Driver::timer_fired`] after this delay. Replaces any
    /// timer already armed.
    ArmTimer(Duration),
    /// Disarm the pending timer.
    CancelTimer,
    /// Run this job in the executor and pass its result to
    /// [`Driver::job_completed`].
    Dispatch(EncodeJob),
}

/// Why a completed job's result was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscardReason {
    /// A reset (or a new source image) happened after dispatch.
    Stale,
    /// Iteration was switched off while the job was running.
    Disabled,
    /// No job was outstanding; the result cannot belong to this driver.
    Unsolicited,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stale => f.write_str("stale result after reset"),
            Self::Disabled => f.write_str("iteration disabled while encoding"),
            Self::Unsolicited => f.write_str("no job outstanding"),
        }
    }
}

/// What happened to a completed job's result.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The result became the new compressed image.
    Applied {
        /// Record after applying.
        record: IterationRecord,
        /// Format the result was encoded in.
        format: ImageFormat,
        /// Time the encode took.
        elapsed: Duration,
    },
    /// The job failed, or its output could not be decoded. State is
    /// unchanged and the loop carries on.
    Failed(EncodeError),
    /// The result was dropped without touching state.
    Discarded(DiscardReason),
}

/// Result of [`Driver::job_completed`].
#[derive(Debug, Clone)]
pub struct Completion {
    /// What happened to the result.
    pub outcome: JobOutcome,
    /// What the host must do next.
    pub command: Option<Command>,
}

/// The recompression loop's state machine.
#[derive(Debug)]
pub struct Driver {
    state: DriverState,
    enabled: bool,
    quality: QualityRange,
    format: Format,
    frame_interval: Duration,
    iteration_limit: Option<u64>,
    feedback: FeedbackState,
    cancel: CancellationToken,
}

impl Driver {
    /// A disabled driver with no image, using `config`'s parameters.
    #[must_use]
    pub fn new(config: &RecompressConfig) -> Self {
        Self {
            state: DriverState::Idle,
            enabled: false,
            quality: config.quality,
            format: config.format,
            frame_interval: config.frame_interval(),
            iteration_limit: config.iteration_limit,
            feedback: FeedbackState::new(),
            cancel: CancellationToken::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Turn iteration on or off.
    ///
    /// Disabling while a job is outstanding keeps the driver
    /// [`Dispatched`](DriverState::Dispatched); the result is discarded
    /// when it arrives.
    ///
    /// Enabling is refused once the iteration limit has been reached:
    /// the driver stays disabled and returns no command until a
    /// [`reset`](Self::reset) or a new image brings the count back
    /// under the limit. Check [`limit_reached`](Self::limit_reached)
    /// to tell a refusal from a plain no-op.
    pub fn set_enabled(&mut self, enabled: bool) -> Option<Command> {
        self.enabled = enabled;
        match (self.state, enabled) {
            (DriverState::Idle, true) => self.schedule(),
            (DriverState::Scheduled, false) => {
                self.state = DriverState::Idle;
                Some(Command::CancelTimer)
            }
            _ => None,
        }
    }

    /// The armed timer expired: dispatch a job for the current image.
    ///
    /// Ignored unless [`Scheduled`](DriverState::Scheduled), so a timer
    /// that fires late after being superseded is harmless.
    pub fn timer_fired(&mut self) -> Option<Command> {
        if self.state != DriverState::Scheduled {
            return None;
        }
        let Some(image) = self.feedback.current_image() else {
            self.state = DriverState::Idle;
            return None;
        };
        let job = EncodeJob {
            image: Arc::clone(image),
            quality: self.quality,
            format: self.format,
        };
        self.state = DriverState::Dispatched;
        Some(Command::Dispatch(job))
    }

    /// The outstanding job finished.
    ///
    /// Stale results (a reset happened since dispatch) and results that
    /// arrive after iteration was disabled are dropped. Successes are
    /// applied to the feedback state; failures leave it unchanged. The
    /// next timer is armed in every case while iteration is enabled.
    pub fn job_completed(&mut self, result: EncodeResult) -> Completion {
        if self.state != DriverState::Dispatched {
            return Completion {
                outcome: JobOutcome::Discarded(DiscardReason::Unsolicited),
                command: None,
            };
        }

        let outcome = if self.cancel.consume() {
            JobOutcome::Discarded(DiscardReason::Stale)
        } else if !self.enabled {
            JobOutcome::Discarded(DiscardReason::Disabled)
        } else {
            match result {
                Ok(frame) => match self.feedback.apply_result(&frame.bytes, frame.quality) {
                    Ok(record) => JobOutcome::Applied {
                        record,
                        format: frame.format,
                        elapsed: frame.elapsed,
                    },
                    Err(e) => JobOutcome::Failed(e),
                },
                Err(e) => JobOutcome::Failed(e),
            }
        };

        let command = self.schedule();
        Completion { outcome, command }
    }

    /// Drop the compressed image and zero the record.
    ///
    /// An outstanding job keeps running and its result is discarded on
    /// arrival; the driver stays [`Dispatched`](DriverState::Dispatched)
    /// until then. Otherwise the driver goes to
    /// [`Scheduled`](DriverState::Scheduled) if enabled, else
    /// [`Idle`](DriverState::Idle).
    pub fn reset(&mut self) -> Option<Command> {
        self.feedback.clear();
        self.invalidate_in_flight()
    }

    /// Replace the source image. Behaves like [`reset`](Self::reset)
    /// and keeps the enabled flag, so iteration resumes on the new
    /// image.
    pub fn set_original(&mut self, image: RgbaImage) -> Option<Command> {
        self.feedback.set_original(image);
        self.invalidate_in_flight()
    }

    /// Change the quality range for the next dispatch.
    pub const fn set_quality_range(&mut self, quality: QualityRange) {
        self.quality = quality;
    }

    /// Change the format for the next dispatch.
    pub const fn set_format(&mut self, format: Format) {
        self.format = format;
    }

    /// Change the delay used the next time a timer is armed.
    pub const fn set_frame_interval(&mut self, interval: Duration) {
        self.frame_interval = interval;
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> DriverState {
        self.state
    }

    /// Whether iteration is switched on.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Quality range the next job will use.
    #[must_use]
    pub const fn quality_range(&self) -> QualityRange {
        self.quality
    }

    /// Format the next job will use.
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    /// Delay between a result and the next dispatch.
    #[must_use]
    pub const fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// Read access to the feedback state.
    #[must_use]
    pub const fn feedback(&self) -> &FeedbackState {
        &self.feedback
    }

    /// Original and latest compressed image for display.
    #[must_use]
    pub fn current_display_image(&self) -> DisplayImages {
        self.feedback.display()
    }

    /// Count and last quality since the last reset.
    #[must_use]
    pub const fn iteration_stats(&self) -> IterationRecord {
        self.feedback.record()
    }

    /// Whether the iteration limit, if any, has been reached.
    #[must_use]
    pub fn limit_reached(&self) -> bool {
        self.iteration_limit
            .is_some_and(|limit| self.feedback.record().count >= limit)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Leave `Dispatched`/`Idle` for `Scheduled` if there is work to do.
    fn schedule(&mut self) -> Option<Command> {
        if self.limit_reached() {
            self.enabled = false;
        }
        if self.enabled && self.feedback.current_image().is_some() {
            self.state = DriverState::Scheduled;
            Some(Command::ArmTimer(self.frame_interval))
        } else {
            self.state = DriverState::Idle;
            None
        }
    }

    /// Mark the outstanding job stale, or (re)schedule if none is.
    fn invalidate_in_flight(&mut self) -> Option<Command> {
        match self.state {
            DriverState::Dispatched => {
                self.cancel.raise();
                None
            }
            DriverState::Scheduled => None,
            DriverState::Idle => self.schedule(),
        }
    }
}
