//! Single-slot cancellation for the one in-flight encode job.
//!
//! A reset does not abort a running encode. It raises the token
//! instead, and the completion handler of the in-flight job consumes
//! it and drops the result. Because at most one job is ever
//! outstanding, one flag is enough: no generation counter, no queue.

/// Marks the in-flight job's result as stale.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CancellationToken {
    raised: bool,
}

impl CancellationToken {
    /// A lowered token.
    #[must_use]
    pub const fn new() -> Self {
        Self { raised: false }
    }

    /// Mark the currently outstanding job as stale.
    ///
    /// Raising twice before the job completes still discards exactly
    /// one result.
    pub const fn raise(&mut self) {
        self.raised = true;
    }

    /// Whether the outstanding job has been marked stale.
    #[must_use]
    pub const fn is_raised(&self) -> bool {
        self.raised
    }

    /// Check and lower the token in one step.
    ///
    /// Returns `true` if the completing job's result must be discarded.
    /// The token is lowered either way, so the next job is unaffected.
    pub const fn consume(&mut self) -> bool {
        let raised = self.raised;
        self.raised = false;
        raised
    }
}
