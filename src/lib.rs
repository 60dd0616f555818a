//! # fix-frames
//!
//! Restore bad frames of a video: extract them, optionally touch them up,
//! and upscale them across a pool of GPU workers.
//!
//! `fix-frames` extracts only the frames you name from a source video with
//! ffmpeg, then runs a chain of external model-inference stages over them:
//! an optional anime deblur, an optional denoise, and a mandatory 2x or 4x
//! super-resolution upscale. Each stage's frames are split into one shard
//! per GPU worker, and every shard runs as its own inference process.
//!
//! ## Quick Start
//!
//! ```no_run
//! use fix_frames::{DeviceList, FixOptions, FrameFixer, FrameSet, InferenceCommand, Scale};
//!
//! let frames = FrameSet::parse("1,3,5-7,10-12,15")?;
//! let options = FixOptions::new()
//!     .with_scale(Scale::X4)
//!     .with_anime(true)
//!     .with_devices(DeviceList::parse("0,1")?);
//!
//! let fixer = FrameFixer::new("/usr/bin/ffmpeg", "input.mkv", options)?;
//! let runner = InferenceCommand::new("upscale-infer", "/opt/fix-frames/models");
//! let report = fixer.run(&frames, &runner)?;
//! println!("{} frames upscaled", report.outputs.len());
//! # Ok::<(), fix_frames::FixFramesError>(())
//! ```
//!
//! ## Files on disk
//!
//! Every frame image lives in the run's work directory as
//! `{frame}.{tag}.png`, where the tag is `extract`, `anime`, `denoise`, or
//! `upscale`. Each stage reads the previous stage's tag and writes its own.
//!
//! ## Testing without GPUs
//!
//! The scheduler only talks to processes through the [`ProcessRunner`]
//! trait. Implement it to simulate workers; see the integration tests for
//! runners that write frames or fail on purpose.
//!
//! ## Requirements
//!
//! `ffmpeg` and `ffprobe` (in the same directory) and an inference program
//! accepting the arguments documented on [`InferenceCommand`].

pub mod configuration;
pub mod device;
pub mod error;
pub mod extract;
pub mod fixer;
pub mod frame_set;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod runner;
pub mod scheduler;
pub mod stage;
pub mod work_dir;

pub use configuration::FixOptions;
pub use device::DeviceList;
pub use error::FixFramesError;
pub use extract::FrameExtractor;
pub use fixer::FrameFixer;
pub use frame_set::FrameSet;
pub use pipeline::{Pipeline, PipelineReport, PipelineState};
pub use probe::{MediaInfo, MediaProbe};
pub use progress::{CancellationToken, ProgressCallback, StageProgress};
pub use runner::{DEVICE_ENV, InferenceCommand, JobOutcome, ProcessRunner, ProcessingJob};
pub use scheduler::{Scheduler, StageRequest};
pub use stage::{DenoiseLevel, Model, Scale, StageTag};
pub use work_dir::{CurrentDirGuard, WORK_DIR_NAME, WorkDir};
