//! Stage pipeline driver.
//!
//! Starting from extracted frames, the driver runs the optional anime and
//! denoise touch-ups and then the mandatory upscale, one stage at a time.
//! Each stage reads the files the previous one wrote, and each stage's
//! workers are numbered after the previous stage's so worker identities
//! never repeat within a run.
//!
//! ```text
//! Extracted -> [Anime] -> [Denoised] -> Upscaled
//! ```

use std::path::{Path, PathBuf};

use crate::configuration::FixOptions;
use crate::device::DeviceList;
use crate::error::FixFramesError;
use crate::frame_set::FrameSet;
use crate::runner::ProcessRunner;
use crate::scheduler::{Scheduler, StageRequest};
use crate::stage::{Model, StageTag};
use crate::work_dir::remove_frame_files;

/// Where a run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Extracted,
    Anime,
    Denoised,
    Upscaled,
}

impl PipelineState {
    /// Tag of the newest files in this state.
    pub fn tag(self) -> StageTag {
        match self {
            PipelineState::Extracted => StageTag::Extract,
            PipelineState::Anime => StageTag::Anime,
            PipelineState::Denoised => StageTag::Denoise,
            PipelineState::Upscaled => StageTag::Upscale,
        }
    }
}

/// Summary of a finished pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Always [`PipelineState::Upscaled`] for a report that was returned.
    pub state: PipelineState,
    /// Stages that ran, in order.
    pub stages: Vec<StageTag>,
    /// Total worker slots used across all stages.
    pub workers_used: usize,
    /// Final upscaled frame files, in frame order.
    pub outputs: Vec<PathBuf>,
}

/// Drives the touch-up and upscale stages for one set of frames.
pub struct Pipeline<'a> {
    options: &'a FixOptions,
    scheduler: Scheduler<'a>,
}

impl<'a> Pipeline<'a> {
    pub fn new(options: &'a FixOptions, runner: &'a dyn ProcessRunner) -> Self {
        Self {
            options,
            scheduler: Scheduler::new(runner).with_progress(options.progress.clone()),
        }
    }

    /// Run every enabled stage over `frames`, whose `extract` files must
    /// already be in `work_dir`.
    ///
    /// # Errors
    ///
    /// Stops at the first failed stage with its
    /// [`FixFramesError::StageExecution`]. Returns
    /// [`FixFramesError::UnexpectedResolution`] if an upscaled frame is not
    /// exactly the requested scale of its extracted frame.
    pub fn run(&self, frames: &FrameSet, work_dir: &Path) -> Result<PipelineReport, FixFramesError> {
        let mut state = PipelineState::Extracted;
        let mut workers_used = 0;
        let mut stages = Vec::new();
        let devices = &self.options.devices;

        if self.options.anime {
            log::info!("Starting anime touchup...");
            workers_used +=
                self.run_stage(frames, work_dir, state, Model::Anime, devices, workers_used)?;
            state = PipelineState::Anime;
            stages.push(state.tag());
        }

        if let Some(level) = self.options.denoise {
            log::info!("Starting denoise touchup (level {})...", level.get());
            workers_used += self.run_stage(
                frames,
                work_dir,
                state,
                Model::Denoise(level),
                &devices.distinct(),
                workers_used,
            )?;
            state = PipelineState::Denoised;
            stages.push(state.tag());
        }

        log::info!("Starting upscale processing...");
        let model = Model::Upscale(self.options.scale);
        workers_used += self.run_stage(frames, work_dir, state, model, devices, workers_used)?;
        state = PipelineState::Upscaled;
        stages.push(state.tag());

        self.verify_resolution(frames, work_dir)?;

        if !self.options.keep_intermediate {
            for tag in [StageTag::Anime, StageTag::Denoise] {
                let removed = remove_frame_files(work_dir, tag, frames)?;
                if removed > 0 {
                    log::debug!("Removed {removed} intermediate {tag} file(s)");
                }
            }
        }

        let outputs = frames
            .iter()
            .map(|frame| StageTag::Upscale.frame_path(work_dir, frame))
            .collect();

        Ok(PipelineReport {
            state,
            stages,
            workers_used,
            outputs,
        })
    }

    /// Purge stale outputs of `model`'s stage, then run it.
    fn run_stage(
        &self,
        frames: &FrameSet,
        work_dir: &Path,
        state: PipelineState,
        model: Model,
        devices: &DeviceList,
        worker_offset: usize,
    ) -> Result<usize, FixFramesError> {
        let output_tag = model.output_tag();
        let purged = remove_frame_files(work_dir, output_tag, frames)?;
        if purged > 0 {
            log::info!("Removed {purged} stale {output_tag} file(s) from a previous run");
        }

        self.scheduler.run_stage(&StageRequest {
            frames: frames.clone(),
            input_tag: state.tag(),
            output_tag,
            model,
            devices: devices.clone(),
            worker_offset,
            work_dir: work_dir.to_path_buf(),
        })
    }

    fn verify_resolution(&self, frames: &FrameSet, work_dir: &Path) -> Result<(), FixFramesError> {
        let factor = self.options.scale.factor();
        for frame in frames {
            let (width, height) =
                image::image_dimensions(StageTag::Extract.frame_path(work_dir, frame))?;
            let expected = (width * factor, height * factor);
            let actual = image::image_dimensions(StageTag::Upscale.frame_path(work_dir, frame))?;
            if actual != expected {
                return Err(FixFramesError::UnexpectedResolution {
                    frame,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}
