//! End-to-end frame fixing.
//!
//! [`FrameFixer`] ties the pieces together: it probes the input, extracts
//! the bad frames into the work directory, and runs the stage pipeline over
//! them.
//!
//! # Example
//!
//! ```no_run
//! use fix_frames::{FixOptions, FrameFixer, FrameSet, InferenceCommand, Scale};
//!
//! let frames = FrameSet::parse("10,20-22")?;
//! let options = FixOptions::new().with_scale(Scale::X2);
//! let fixer = FrameFixer::new("/usr/bin/ffmpeg", "input.mkv", options)?;
//! let runner = InferenceCommand::new("upscale-infer", "models");
//!
//! let report = fixer.run(&frames, &runner)?;
//! for path in &report.outputs {
//!     println!("{}", path.display());
//! }
//! # Ok::<(), fix_frames::FixFramesError>(())
//! ```

use std::path::{Path, PathBuf};

use crate::configuration::FixOptions;
use crate::error::FixFramesError;
use crate::extract::FrameExtractor;
use crate::frame_set::FrameSet;
use crate::pipeline::{Pipeline, PipelineReport};
use crate::probe::MediaProbe;
use crate::runner::ProcessRunner;
use crate::work_dir::WorkDir;

/// Restores the bad frames of one video.
#[derive(Debug, Clone)]
pub struct FrameFixer {
    ffmpeg: PathBuf,
    input: PathBuf,
    options: FixOptions,
}

impl FrameFixer {
    /// Prepare a run for `input`.
    ///
    /// Relative paths are resolved against the current directory so the run
    /// is unaffected by later directory changes. A bare program name for
    /// `ffmpeg` is left alone to be found on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`FixFramesError::InputNotFound`] if `input` does not exist.
    pub fn new(
        ffmpeg: impl Into<PathBuf>,
        input: impl Into<PathBuf>,
        options: FixOptions,
    ) -> Result<Self, FixFramesError> {
        let input = input.into();
        if !input.exists() {
            return Err(FixFramesError::InputNotFound(input));
        }

        let ffmpeg = ffmpeg.into();
        let ffmpeg = if has_directory(&ffmpeg) {
            std::path::absolute(&ffmpeg)?
        } else {
            ffmpeg
        };

        Ok(Self {
            ffmpeg,
            input: std::path::absolute(&input)?,
            options,
        })
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn options(&self) -> &FixOptions {
        &self.options
    }

    /// The work directory this run uses, created if needed.
    pub fn work_dir(&self) -> Result<WorkDir, FixFramesError> {
        WorkDir::acquire(self.options.temp_dir())
    }

    /// Probe, extract, and process `frames`.
    pub fn run(
        &self,
        frames: &FrameSet,
        runner: &dyn ProcessRunner,
    ) -> Result<PipelineReport, FixFramesError> {
        let work_dir = self.work_dir()?;
        self.run_in(frames, &work_dir, runner)
    }

    /// Like [`run`](Self::run), in an already acquired work directory.
    pub fn run_in(
        &self,
        frames: &FrameSet,
        work_dir: &WorkDir,
        runner: &dyn ProcessRunner,
    ) -> Result<PipelineReport, FixFramesError> {
        log::info!("Processing File: {}", self.input.display());
        log::debug!("{:?}", self.options);

        let info = MediaProbe::probe(&self.ffmpeg, &self.input)?;
        log::info!(
            "Video: {}x{} @ {:.3} fps",
            info.width,
            info.height,
            info.frame_rate
        );
        if let Some(crop) = &info.crop_filter {
            log::info!("Crop Detected: {crop}");
        }
        if let Some(prune) = &info.prune_filter {
            log::info!("Variable frame rate, normalising with {prune}");
        }

        FrameExtractor::new(&self.ffmpeg, &self.input)
            .with_filters(info.filters())
            .extract(frames, work_dir.path())?;

        let report = Pipeline::new(&self.options, runner).run(frames, work_dir.path())?;
        log::info!("Fix frames finished");
        Ok(report)
    }
}

fn has_directory(path: &Path) -> bool {
    path.parent()
        .is_some_and(|parent| !parent.as_os_str().is_empty())
}
