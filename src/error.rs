//! Error types for the `fix-frames` crate.
//!
//! This module defines [`FixFramesError`], the unified error type returned by
//! all fallible operations in the crate. Errors carry enough context to
//! diagnose a failed run from the log alone: the offending spec text, the
//! external command line, or the shard of frames a worker was processing.

use std::{io::Error as IoError, path::PathBuf};

use image::ImageError;
use thiserror::Error;

use crate::frame_set::FrameSet;
use crate::stage::StageTag;

/// The unified error type for all `fix-frames` operations.
///
/// Every public function that can fail returns `Result<T, FixFramesError>`.
/// None of these errors are retried internally; a rerun with the same
/// bad-frame spec is the recovery path.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FixFramesError {
    /// The bad-frame specification could not be parsed.
    #[error("Invalid frame spec {spec:?}: {reason}")]
    InvalidSpec {
        /// The text that was passed to [`FrameSet::parse`].
        spec: String,
        /// Why the spec was rejected.
        reason: String,
    },

    /// The GPU device list could not be parsed.
    #[error("Invalid GPU list {list:?}: {reason}")]
    InvalidDeviceList {
        /// The comma-separated list as given.
        list: String,
        /// Why the list was rejected.
        reason: String,
    },

    /// Upscaling only supports factors of 2 and 4.
    #[error("Scale must be 2 or 4, got {0}")]
    InvalidScale(u32),

    /// The input video does not exist.
    #[error("Input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    /// Media probing failed.
    #[error("Failed to probe {}: {reason}", path.display())]
    Probe {
        /// The media file being probed.
        path: PathBuf,
        /// Underlying reason the probe failed.
        reason: String,
    },

    /// Frame extraction failed. This is fatal for the whole run.
    #[error("Frame extraction failed: {reason}")]
    Extraction {
        /// Underlying reason the extraction failed.
        reason: String,
        /// The command line that was executed, if one was.
        command: Option<String>,
    },

    /// A worker of a processing stage failed.
    ///
    /// Outputs written by sibling workers of the same stage are left on disk.
    #[error(
        "Stage {stage} failed on worker {worker} (GPU {device}) for frames {frames}: {diagnostics}"
    )]
    StageExecution {
        /// The tag the failed stage was producing.
        stage: StageTag,
        /// Worker identity (stage worker offset plus shard index).
        worker: usize,
        /// GPU device the worker was bound to.
        device: u32,
        /// The shard of frames assigned to the failed worker.
        frames: FrameSet,
        /// Exit status and captured diagnostic output.
        diagnostics: String,
    },

    /// An upscaled frame does not have the expected dimensions.
    #[error(
        "Frame {frame} has resolution {actual:?}, expected {expected:?} after upscaling"
    )]
    UnexpectedResolution {
        /// The frame index.
        frame: u64,
        /// `(width, height)` expected from the extracted frame and the scale.
        expected: (u32, u32),
        /// `(width, height)` actually found on disk.
        actual: (u32, u32),
    },

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate while inspecting frame files.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),
}
