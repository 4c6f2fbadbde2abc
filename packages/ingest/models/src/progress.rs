//! Hooks through which a job run reports how far it has got.
//!
//! The download pass and the index pass both count in partitions; the
//! message carries the partition or file currently being worked on.

use std::sync::Arc;

/// Receiver of job progress.
///
/// One reporter is shared by every concurrent download of a partition.
pub trait ProgressCallback: Send + Sync {
    /// Number of partitions the current pass will walk.
    fn set_total(&self, total: u64);

    /// Moves to an absolute partition count, e.g. `0` when a pass starts.
    fn set_position(&self, pos: u64);

    /// Counts `delta` more partitions as walked.
    fn inc(&self, delta: u64);

    /// Describes what is being worked on right now.
    fn set_message(&self, msg: String);

    /// Removes the indicator once the job is over.
    fn finish_and_clear(&self);
}

/// Reporter for library callers and tests that show nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn set_position(&self, _pos: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}

#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
