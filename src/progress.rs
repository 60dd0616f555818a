//! Progress reporting for processing stages.
//!
//! The scheduler reports a [`StageProgress`] snapshot to a
//! [`ProgressCallback`] every time a worker finishes its shard. The binary
//! drives a terminal progress bar from these callbacks.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use fix_frames::{FixOptions, ProgressCallback, StageProgress};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &StageProgress) {
//!         println!("[{}] {}/{} frames", info.stage, info.completed_frames, info.total_frames);
//!     }
//! }
//!
//! let options = FixOptions::new().with_progress(Arc::new(PrintProgress));
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::time::{Duration, Instant};

use crate::stage::StageTag;

/// A snapshot of stage progress.
#[derive(Debug, Clone)]
pub struct StageProgress {
    /// The tag the stage is producing.
    pub stage: StageTag,
    /// Worker whose completion triggered this snapshot.
    pub worker: usize,
    /// Frames whose shards have finished so far.
    pub completed_frames: u64,
    /// Frames in the whole stage.
    pub total_frames: u64,
    /// Completion percentage (0.0 – 100.0).
    pub percentage: f32,
    /// Wall-clock time since the stage started.
    pub elapsed: Duration,
    /// Estimated time remaining, based on throughput so far.
    pub estimated_remaining: Option<Duration>,
}

/// Receives progress updates while a stage runs.
///
/// Implementations must be [`Send`] and [`Sync`] because callbacks are
/// invoked from the threads waiting on worker processes.
pub trait ProgressCallback: Send + Sync {
    /// Called once per finished shard.
    fn on_progress(&self, info: &StageProgress);

    /// Called once when a stage starts, before any worker is launched.
    fn on_stage_start(&self, _stage: StageTag, _total_frames: u64) {}

    /// Called once when every worker of a stage has finished successfully.
    fn on_stage_finish(&self, _stage: StageTag) {}
}

/// Shared stop flag for the workers of one stage.
///
/// The scheduler cancels the token as soon as any worker of a stage fails;
/// runners check it while their process runs and stop early.
///
/// ```
/// use fix_frames::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_view = token.clone();
/// token.cancel();
/// assert!(worker_view.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Discards all progress notifications. The default callback.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &StageProgress) {}
}

/// Tracks completed frames across concurrently finishing workers.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    stage: StageTag,
    total: u64,
    completed: AtomicU64,
    start_time: Instant,
}

impl ProgressTracker {
    pub(crate) fn new(callback: Arc<dyn ProgressCallback>, stage: StageTag, total: u64) -> Self {
        callback.on_stage_start(stage, total);
        Self {
            callback,
            stage,
            total,
            completed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a finished shard and emit a snapshot.
    pub(crate) fn shard_finished(&self, worker: usize, frames: u64) {
        let completed = self.completed.fetch_add(frames, Ordering::AcqRel) + frames;
        let elapsed = self.start_time.elapsed();

        let percentage = if self.total > 0 {
            (completed as f32 / self.total as f32) * 100.0
        } else {
            100.0
        };

        let estimated_remaining = (completed > 0).then(|| {
            let remaining = self.total.saturating_sub(completed);
            elapsed.mul_f64(remaining as f64 / completed as f64)
        });

        self.callback.on_progress(&StageProgress {
            stage: self.stage,
            worker,
            completed_frames: completed,
            total_frames: self.total,
            percentage,
            elapsed,
            estimated_remaining,
        });
    }

    pub(crate) fn finish(&self) {
        self.callback.on_stage_finish(self.stage);
    }
}
