//! Inference subprocess boundary.
//!
//! The scheduler never spawns processes itself. It hands each shard to a
//! [`ProcessRunner`] as a [`ProcessingJob`], which keeps the shard dispatch
//! logic testable with runners that only simulate GPU work.
//!
//! [`InferenceCommand`] is the real runner: it launches one inference program
//! per job with the job's GPU selected through `CUDA_VISIBLE_DEVICES`.

use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use crate::error::FixFramesError;
use crate::frame_set::FrameSet;
use crate::progress::CancellationToken;
use crate::stage::{Model, StageTag};

/// Environment variable the inference program reads to select its GPU.
pub const DEVICE_ENV: &str = "CUDA_VISIBLE_DEVICES";

/// Lines of captured diagnostic output kept in error messages.
const DIAGNOSTIC_LINES: usize = 20;

/// How often a running worker checks for cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One inference subprocess invocation, scoped to a shard of frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingJob {
    /// Worker identity: the stage's worker offset plus the shard index.
    pub worker: usize,
    /// GPU the worker is bound to.
    pub device: u32,
    /// The shard of frames this worker owns.
    pub frames: FrameSet,
    pub model: Model,
    /// Tag of the files read.
    pub input_tag: StageTag,
    /// Tag of the files written.
    pub output_tag: StageTag,
    /// Directory holding the frame files.
    pub work_dir: PathBuf,
}

impl ProcessingJob {
    /// Frames of this shard whose output file does not exist.
    pub fn missing_outputs(&self) -> FrameSet {
        self.frames
            .iter()
            .filter(|&frame| !self.output_tag.frame_path(&self.work_dir, frame).exists())
            .collect()
    }
}

/// Result of a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// Whether the process exited successfully.
    pub success: bool,
    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,
    /// Captured diagnostic output.
    pub diagnostics: String,
}

impl JobOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            diagnostics: String::new(),
        }
    }

    pub fn failed(exit_code: Option<i32>, diagnostics: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            diagnostics: diagnostics.into(),
        }
    }
}

/// Runs a [`ProcessingJob`] to completion.
///
/// `run` blocks until the job's process has exited and been reaped. The
/// scheduler calls it from one thread per shard, so implementations must be
/// [`Send`] and [`Sync`].
pub trait ProcessRunner: Send + Sync {
    /// Run the job and report how it ended.
    ///
    /// Once `cancel` is cancelled, because a sibling worker of the stage
    /// failed, the runner should stop its process and return a failed
    /// outcome promptly.
    ///
    /// # Errors
    ///
    /// An `Err` means the job could not be run at all (e.g. the program could
    /// not be spawned). A process that ran and failed is an `Ok` outcome with
    /// `success == false`.
    fn run(
        &self,
        job: &ProcessingJob,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, FixFramesError>;
}

/// Launches an external inference program per job.
///
/// The program is invoked as
///
/// ```text
/// PROGRAM --model MODELS/NAME --input-tag TAG --output-tag TAG
///         --frames SPEC --scale N --worker ID [--noise-level N]
/// ```
///
/// with `CUDA_VISIBLE_DEVICES` set to the job's device and the work
/// directory as its current directory. `SPEC` is the shard in compact frame
/// spec form, e.g. `10,20-22`.
#[derive(Debug, Clone)]
pub struct InferenceCommand {
    program: PathBuf,
    models_dir: PathBuf,
}

impl InferenceCommand {
    pub fn new(program: impl Into<PathBuf>, models_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            models_dir: models_dir.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Build the command line for a job without running it.
    pub fn command(&self, job: &ProcessingJob) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--model")
            .arg(self.models_dir.join(job.model.file_name()))
            .args(["--input-tag", job.input_tag.as_str()])
            .args(["--output-tag", job.output_tag.as_str()])
            .arg("--frames")
            .arg(job.frames.to_string())
            .arg("--scale")
            .arg(job.model.scale().to_string())
            .arg("--worker")
            .arg(job.worker.to_string());

        if let Model::Denoise(level) = job.model {
            command.arg("--noise-level").arg(level.get().to_string());
        }

        command
            .env(DEVICE_ENV, job.device.to_string())
            .current_dir(&job.work_dir);
        command
    }
}

impl ProcessRunner for InferenceCommand {
    fn run(
        &self,
        job: &ProcessingJob,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, FixFramesError> {
        let mut command = self.command(job);
        log::debug!("worker {} (GPU {}): {}", job.worker, job.device, render_command(&command));

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        // A killed child's own children may still hold the pipes, so the
        // drain threads are only joined after a normal exit.
        let Some(status) = wait_cancellable(&mut child, cancel)? else {
            log::warn!("Worker {} (GPU {}) stopped after a sibling failed", job.worker, job.device);
            return Ok(JobOutcome::failed(None, "cancelled after another worker failed"));
        };
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        if status.success() {
            return Ok(JobOutcome::succeeded());
        }

        let captured = if stderr.trim().is_empty() { stdout } else { stderr };
        Ok(JobOutcome::failed(
            status.code(),
            format!("{status}; {}", tail_lines(&captured, DIAGNOSTIC_LINES)),
        ))
    }
}

/// Read a child's output pipe to the end on its own thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut bytes);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

/// Wait for `child` to exit, killing it if `cancel` fires first.
///
/// Returns `None` when the child was killed.
pub(crate) fn wait_cancellable(
    child: &mut Child,
    cancel: &CancellationToken,
) -> io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if cancel.is_cancelled() {
            // Fails only if the child exited in the meantime; wait reaps it either way.
            let _ = child.kill();
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(CANCEL_POLL_INTERVAL);
    }
}

/// Render a command line for logs and error messages.
pub(crate) fn render_command(command: &Command) -> String {
    let mut parts: Vec<OsString> = vec![command.get_program().to_os_string()];
    parts.extend(command.get_args().map(|arg| arg.to_os_string()));
    parts
        .iter()
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// The last `count` non-empty lines of `text`, newline-joined.
pub(crate) fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
