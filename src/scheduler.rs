//! Multi-GPU stage scheduler.
//!
//! [`Scheduler::run_stage`] splits a stage's frames into one contiguous shard
//! per device-list entry and runs every shard as its own inference process,
//! all in parallel. It returns once every shard has finished.
//!
//! Shards are a true partition of the frame set, so workers never read or
//! write the same frame file even though they share the work directory.
//!
//! # Example
//!
//! ```no_run
//! use fix_frames::{
//!     DeviceList, FrameSet, InferenceCommand, Model, Scale, Scheduler, StageRequest, StageTag,
//! };
//!
//! let runner = InferenceCommand::new("upscale-infer", "models");
//! let request = StageRequest {
//!     frames: FrameSet::parse("10,20-22")?,
//!     input_tag: StageTag::Extract,
//!     output_tag: StageTag::Upscale,
//!     model: Model::Upscale(Scale::X2),
//!     devices: DeviceList::parse("0,1")?,
//!     worker_offset: 0,
//!     work_dir: "/tmp/upscale_video".into(),
//! };
//! let workers_used = Scheduler::new(&runner).run_stage(&request)?;
//! assert_eq!(workers_used, 2);
//! # Ok::<(), fix_frames::FixFramesError>(())
//! ```

use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Instant;

use crate::device::DeviceList;
use crate::error::FixFramesError;
use crate::frame_set::FrameSet;
use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback, ProgressTracker};
use crate::runner::{JobOutcome, ProcessRunner, ProcessingJob};
use crate::stage::{Model, StageTag};

/// Everything one stage needs to run.
#[derive(Debug, Clone)]
pub struct StageRequest {
    /// Frames to process.
    pub frames: FrameSet,
    /// Tag of the files the stage reads.
    pub input_tag: StageTag,
    /// Tag of the files the stage writes.
    pub output_tag: StageTag,
    pub model: Model,
    /// One worker per entry.
    pub devices: DeviceList,
    /// Worker identities of earlier stages in the same run; this stage's
    /// workers are numbered from here.
    pub worker_offset: usize,
    /// Directory holding the frame files.
    pub work_dir: PathBuf,
}

impl StageRequest {
    /// Split the request into one job per device-list entry.
    ///
    /// Shard `i` goes to `devices[i]` as worker `worker_offset + i`. Shards
    /// left empty because there are fewer frames than devices produce no job.
    pub fn jobs(&self) -> Vec<ProcessingJob> {
        self.frames
            .partition(self.devices.len())
            .into_iter()
            .zip(self.devices.as_slice())
            .enumerate()
            .filter(|(_, (shard, _))| !shard.is_empty())
            .map(|(slot, (shard, &device))| ProcessingJob {
                worker: self.worker_offset + slot,
                device,
                frames: shard,
                model: self.model,
                input_tag: self.input_tag,
                output_tag: self.output_tag,
                work_dir: self.work_dir.clone(),
            })
            .collect()
    }
}

/// Runs stages on a [`ProcessRunner`].
pub struct Scheduler<'a> {
    runner: &'a dyn ProcessRunner,
    progress: Arc<dyn ProgressCallback>,
}

impl<'a> Scheduler<'a> {
    pub fn new(runner: &'a dyn ProcessRunner) -> Self {
        Self {
            runner,
            progress: Arc::new(NoOpProgress),
        }
    }

    /// Report per-shard completion to `progress`.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Run one stage across all devices and wait for every worker.
    ///
    /// Returns the number of worker slots the stage used, which is always
    /// the length of the device list. Callers add it to the next stage's
    /// worker offset.
    ///
    /// # Errors
    ///
    /// Returns [`FixFramesError::StageExecution`] for the first worker to
    /// fail, either because its process failed or because it left some of its
    /// output files unwritten. That failure cancels the stage: workers still
    /// running are told to stop through their [`CancellationToken`], and the
    /// call returns as soon as they have. Outputs of workers that already
    /// succeeded stay on disk. Nothing is retried.
    pub fn run_stage(&self, request: &StageRequest) -> Result<usize, FixFramesError> {
        let jobs = request.jobs();
        let started = Instant::now();
        log::info!(
            "Stage {}: {} frame(s) across {} worker(s) with {}",
            request.output_tag,
            request.frames.len(),
            jobs.len(),
            request.model,
        );

        let tracker = ProgressTracker::new(
            self.progress.clone(),
            request.output_tag,
            request.frames.len() as u64,
        );
        let cancel = CancellationToken::new();

        let failures: Vec<(&ProcessingJob, JobOutcome)> = thread::scope(|scope| {
            let (sender, receiver) = mpsc::channel();
            let handles: Vec<_> = jobs
                .iter()
                .map(|job| {
                    let sender = sender.clone();
                    let tracker = &tracker;
                    let cancel = &cancel;
                    let handle = scope.spawn(move || {
                        let outcome = self.run_job(job, cancel);
                        if outcome.success {
                            tracker.shard_finished(job.worker, job.frames.len() as u64);
                        }
                        let _ = sender.send((job, outcome));
                    });
                    (job, handle)
                })
                .collect();
            drop(sender);

            let mut failures = Vec::new();
            for (job, outcome) in receiver {
                if !outcome.success {
                    if failures.is_empty() && jobs.len() > 1 {
                        log::error!("Stopping the other workers of stage {}", request.output_tag);
                    }
                    cancel.cancel();
                    failures.push((job, outcome));
                }
            }

            for (job, handle) in handles {
                if handle.join().is_err() {
                    failures.push((job, JobOutcome::failed(None, "worker thread panicked")));
                }
            }
            failures
        });

        let mut failures = failures.into_iter();
        if let Some((job, outcome)) = failures.next() {
            for (other, other_outcome) in failures {
                log::error!(
                    "Worker {} (GPU {}) also failed on frames {}: {}",
                    other.worker, other.device, other.frames, other_outcome.diagnostics
                );
            }
            return Err(FixFramesError::StageExecution {
                stage: request.output_tag,
                worker: job.worker,
                device: job.device,
                frames: job.frames.clone(),
                diagnostics: outcome.diagnostics,
            });
        }

        tracker.finish();
        log::info!(
            "Stage {} finished in {:.1}s",
            request.output_tag,
            started.elapsed().as_secs_f64()
        );
        Ok(request.devices.len())
    }

    /// Run one job and check that it wrote every frame of its shard.
    fn run_job(&self, job: &ProcessingJob, cancel: &CancellationToken) -> JobOutcome {
        log::debug!(
            "Worker {} on GPU {} starting frames {}",
            job.worker, job.device, job.frames
        );

        let outcome = match self.runner.run(job, cancel) {
            Ok(outcome) => outcome,
            Err(error) => JobOutcome::failed(None, format!("could not run worker: {error}")),
        };
        if !outcome.success {
            log::error!(
                "Worker {} (GPU {}) failed on frames {}",
                job.worker, job.device, job.frames
            );
            return outcome;
        }

        let missing = job.missing_outputs();
        if !missing.is_empty() {
            log::error!(
                "Worker {} (GPU {}) exited cleanly but did not write frames {}",
                job.worker, job.device, missing
            );
            return JobOutcome::failed(
                outcome.exit_code,
                format!("missing {} output for frames {missing}", job.output_tag),
            );
        }

        log::debug!("Worker {} finished frames {}", job.worker, job.frames);
        outcome
    }
}
