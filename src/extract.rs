//! Frame extraction with the external `ffmpeg` program.
//!
//! ffmpeg cannot cheaply decode an arbitrary list of frames, so the
//! extractor decodes every frame from 1 up to the highest one needed and
//! then deletes the frames that are not in the set. Lossless PNGs of a
//! feature-length film run to hundreds of gigabytes, so only the requested
//! frames are kept on disk.
//!
//! Extracted frames are reused across runs only while they come from the same
//! source. [`SOURCE_MARKER`] records the input path, size, modification time
//! and filters; when it does not match, every extracted frame is discarded
//! before extracting again.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::UNIX_EPOCH;

use serde_json::{Value, json};

use crate::error::FixFramesError;
use crate::frame_set::FrameSet;
use crate::runner::{render_command, tail_lines};
use crate::stage::StageTag;
use crate::work_dir::{frame_files, remove_frame_files};

/// File in the work directory describing where its extracted frames came from.
pub const SOURCE_MARKER: &str = "extract.source.json";

/// Extracts frames of a video as `{n}.extract.png` files.
#[derive(Debug, Clone)]
pub struct FrameExtractor {
    ffmpeg: PathBuf,
    input: PathBuf,
    filters: Vec<String>,
}

impl FrameExtractor {
    pub fn new(ffmpeg: impl Into<PathBuf>, input: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            input: input.into(),
            filters: Vec::new(),
        }
    }

    /// Video filters applied while decoding, in order (e.g. crop then fps).
    pub fn with_filters(mut self, filters: Vec<String>) -> Self {
        self.filters = filters;
        self
    }

    /// The highest frame of `frames` that has no extracted file yet, or
    /// `None` if all of them are already on disk.
    pub fn pending_max_frame(frames: &FrameSet, work_dir: &Path) -> Option<u64> {
        frames
            .iter()
            .rev()
            .find(|&frame| !StageTag::Extract.frame_path(work_dir, frame).exists())
    }

    /// Build the ffmpeg command extracting frames `1..=max_frame`.
    pub fn command(&self, max_frame: u64, work_dir: &Path) -> Command {
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(["-hide_banner", "-hwaccel", "auto", "-i"])
            .arg(&self.input)
            .arg("-vframes")
            .arg(max_frame.to_string())
            .args(["-loglevel", "error", "-pix_fmt", "rgb24"]);

        if !self.filters.is_empty() {
            command.arg("-vf").arg(self.filters.join(","));
        }

        command
            .arg(format!("%d.{}.png", StageTag::Extract.as_str()))
            .current_dir(work_dir);
        command
    }

    fn source(&self) -> Value {
        let metadata = fs::metadata(&self.input).ok();
        let modified = metadata
            .as_ref()
            .and_then(|metadata| metadata.modified().ok())
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|since_epoch| since_epoch.as_secs());
        let input = std::path::absolute(&self.input).unwrap_or_else(|_| self.input.clone());

        json!({
            "input": input.display().to_string(),
            "size": metadata.map(|metadata| metadata.len()),
            "modified": modified,
            "filters": self.filters,
        })
    }

    fn source_matches(&self, work_dir: &Path) -> bool {
        fs::read_to_string(work_dir.join(SOURCE_MARKER))
            .ok()
            .and_then(|text| serde_json::from_str::<Value>(&text).ok())
            .is_some_and(|recorded| recorded == self.source())
    }

    /// Mark the extracted frames in `work_dir` as coming from this input and
    /// these filters.
    pub(crate) fn record_source(&self, work_dir: &Path) -> Result<(), FixFramesError> {
        fs::write(work_dir.join(SOURCE_MARKER), self.source().to_string())?;
        Ok(())
    }

    /// Delete every extracted frame in `work_dir` that is not in `frames`.
    fn remove_extras(frames: &FrameSet, work_dir: &Path) -> Result<usize, FixFramesError> {
        let extras = frame_files(work_dir, StageTag::Extract)?
            .into_iter()
            .filter(|&frame| !frames.contains(frame));
        remove_frame_files(work_dir, StageTag::Extract, extras)
    }

    /// Extract `frames` into `work_dir`.
    ///
    /// Frames already extracted from the same source by an earlier,
    /// interrupted run are reused; if every frame is present ffmpeg is not run
    /// at all. Extracted frames from a different source are discarded first.
    /// Either way, extracted frames outside `frames` are deleted.
    ///
    /// # Errors
    ///
    /// Returns [`FixFramesError::Extraction`] if ffmpeg cannot be run or exits
    /// unsuccessfully, or if the video ends before some requested frame.
    pub fn extract(&self, frames: &FrameSet, work_dir: &Path) -> Result<(), FixFramesError> {
        if !self.source_matches(work_dir) {
            let stale = frame_files(work_dir, StageTag::Extract)?;
            if !stale.is_empty() {
                log::info!(
                    "Discarding {} frame(s) extracted from a different source.",
                    stale.len()
                );
                remove_frame_files(work_dir, StageTag::Extract, stale)?;
            }
            self.record_source(work_dir)?;
        }

        let Some(max_frame) = Self::pending_max_frame(frames, work_dir) else {
            let removed = Self::remove_extras(frames, work_dir)?;
            log::debug!("Removed {removed} leftover frame(s) outside the bad-frame set");
            log::info!("All {} frame(s) already extracted.", frames.len());
            return Ok(());
        };

        let mut command = self.command(max_frame, work_dir);
        let rendered = render_command(&command);
        log::info!("Starting Frames Extraction..");
        log::info!("{rendered}");

        let output = command.output().map_err(|error| FixFramesError::Extraction {
            reason: format!("could not run {}: {error}", self.ffmpeg.display()),
            command: Some(rendered.clone()),
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(FixFramesError::Extraction {
                reason: format!("ffmpeg {}: {}", output.status, tail_lines(&stderr, 10)),
                command: Some(rendered),
            });
        }
        if !stderr.trim().is_empty() {
            log::warn!("ffmpeg reported during extraction: {}", tail_lines(&stderr, 10));
        }

        log::info!("Removing extra extracted frames.");
        let removed = Self::remove_extras(frames, work_dir)?;
        log::debug!("Removed {removed} frame(s) outside the bad-frame set");

        let missing: FrameSet = frames
            .iter()
            .filter(|&frame| !StageTag::Extract.frame_path(work_dir, frame).exists())
            .collect();
        if !missing.is_empty() {
            return Err(FixFramesError::Extraction {
                reason: format!("video ended before frames {missing}"),
                command: Some(rendered),
            });
        }

        Ok(())
    }
}
