//! Media probing through the external `ffprobe` and `ffmpeg` programs.
//!
//! [`MediaProbe`] reads the first video stream's dimensions, frame rate and
//! duration with `ffprobe`, and detects letterboxing with ffmpeg's
//! `cropdetect` filter. The result tells the extractor which filters to
//! apply so that extracted frame numbers match what the user sees.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use fix_frames::MediaProbe;
//!
//! let info = MediaProbe::probe(Path::new("/usr/bin/ffmpeg"), Path::new("input.mkv"))?;
//! println!("{}x{} @ {:.3} fps", info.width, info.height, info.frame_rate);
//! println!("filters: {:?}", info.filters());
//! # Ok::<(), fix_frames::FixFramesError>(())
//! ```

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde_json::Value;

use crate::error::FixFramesError;
use crate::runner::{render_command, tail_lines};

/// Frames `cropdetect` samples.
const CROP_SAMPLE_FRAMES: u32 = 240;

/// Frame rates closer than this are treated as equal.
const FRAME_RATE_TOLERANCE: f64 = 0.01;

/// What the extractor needs to know about the input video.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct MediaInfo {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Average frames per second.
    pub frame_rate: f64,
    /// Container duration, when reported.
    pub duration: Option<Duration>,
    /// `crop=w:h:x:y` filter removing letterbox bars, if any were found.
    pub crop_filter: Option<String>,
    /// `fps=` filter normalising a variable-frame-rate stream, if needed.
    pub prune_filter: Option<String>,
}

impl MediaInfo {
    /// Filters to apply during extraction, crop first.
    pub fn filters(&self) -> Vec<String> {
        self.crop_filter
            .iter()
            .chain(self.prune_filter.iter())
            .cloned()
            .collect()
    }
}

/// Probes media files with the ffmpeg tool suite.
pub struct MediaProbe;

impl MediaProbe {
    /// Probe `input` and run crop detection.
    ///
    /// # Errors
    ///
    /// Returns [`FixFramesError::Probe`] if `ffprobe` or `ffmpeg` exits
    /// unsuccessfully or prints output that cannot be parsed. A video without
    /// letterboxing or with a constant frame rate is not an error; the
    /// corresponding filter is simply `None`.
    pub fn probe(ffmpeg: &Path, input: &Path) -> Result<MediaInfo, FixFramesError> {
        let mut info = Self::probe_stream(ffmpeg, input)?;
        info.crop_filter = Self::crop_detect(ffmpeg, input, &info)?;
        Ok(info)
    }

    /// Read stream metadata with `ffprobe`, without crop detection.
    pub fn probe_stream(ffmpeg: &Path, input: &Path) -> Result<MediaInfo, FixFramesError> {
        let mut command = Command::new(Self::ffprobe_path(ffmpeg));
        command
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_streams", "-show_format", "-of", "json"])
            .arg(input);
        log::debug!("Probing: {}", render_command(&command));

        let output = command.output().map_err(|error| probe_error(input, error))?;
        if !output.status.success() {
            return Err(probe_error(
                input,
                format!(
                    "ffprobe {}: {}",
                    output.status,
                    tail_lines(&String::from_utf8_lossy(&output.stderr), 5)
                ),
            ));
        }

        parse_ffprobe_json(input, &String::from_utf8_lossy(&output.stdout))
    }

    /// Detect letterbox bars with ffmpeg's `cropdetect` filter.
    ///
    /// Samples a window starting a third of the way into the video, where
    /// opening titles are unlikely, and returns the crop reported most
    /// often. Returns `None` when nothing would be cropped.
    pub fn crop_detect(
        ffmpeg: &Path,
        input: &Path,
        info: &MediaInfo,
    ) -> Result<Option<String>, FixFramesError> {
        let mut command = Command::new(ffmpeg);
        command.arg("-hide_banner");
        if let Some(duration) = info.duration.filter(|duration| !duration.is_zero()) {
            command
                .arg("-ss")
                .arg(format!("{:.3}", duration.as_secs_f64() / 3.0));
        }
        command
            .arg("-i")
            .arg(input)
            .args(["-vf", "cropdetect", "-an", "-sn"])
            .arg("-frames:v")
            .arg(CROP_SAMPLE_FRAMES.to_string())
            .args(["-f", "null", "-"]);
        log::debug!("Detecting crop: {}", render_command(&command));

        let output = command.output().map_err(|error| probe_error(input, error))?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(probe_error(
                input,
                format!("cropdetect {}: {}", output.status, tail_lines(&stderr, 5)),
            ));
        }

        Ok(parse_crop_output(&stderr, info.width, info.height))
    }

    /// Location of `ffprobe`, assumed to sit next to `ffmpeg`.
    ///
    /// ```
    /// use std::path::Path;
    ///
    /// use fix_frames::MediaProbe;
    ///
    /// assert_eq!(
    ///     MediaProbe::ffprobe_path(Path::new("/opt/ffmpeg/bin/ffmpeg")),
    ///     Path::new("/opt/ffmpeg/bin/ffprobe"),
    /// );
    /// assert_eq!(MediaProbe::ffprobe_path(Path::new("ffmpeg.exe")), Path::new("ffprobe.exe"));
    /// ```
    pub fn ffprobe_path(ffmpeg: &Path) -> PathBuf {
        let file_name = match ffmpeg.extension() {
            Some(extension) => format!("ffprobe.{}", extension.to_string_lossy()),
            None => "ffprobe".to_string(),
        };
        ffmpeg.with_file_name(file_name)
    }
}

fn probe_error(input: &Path, reason: impl ToString) -> FixFramesError {
    FixFramesError::Probe {
        path: input.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Parse `ffprobe -of json` output for the first video stream.
pub(crate) fn parse_ffprobe_json(input: &Path, json: &str) -> Result<MediaInfo, FixFramesError> {
    let document: Value = serde_json::from_str(json)
        .map_err(|error| probe_error(input, format!("unreadable ffprobe output: {error}")))?;

    let stream = document
        .get("streams")
        .and_then(Value::as_array)
        .and_then(|streams| streams.first())
        .ok_or_else(|| probe_error(input, "no video stream found"))?;

    let dimension = |key: &str| {
        stream
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|value| u32::try_from(value).ok())
            .filter(|&value| value > 0)
            .ok_or_else(|| probe_error(input, format!("missing stream {key}")))
    };
    let width = dimension("width")?;
    let height = dimension("height")?;

    let rate = |key: &str| {
        stream
            .get(key)
            .and_then(Value::as_str)
            .and_then(parse_rational)
    };
    let average = rate("avg_frame_rate");
    let real = rate("r_frame_rate");
    let (numerator, denominator) = average
        .or(real)
        .ok_or_else(|| probe_error(input, "no usable frame rate"))?;
    let frame_rate = numerator as f64 / denominator as f64;

    let prune_filter = match (average, real) {
        (Some(_), Some((real_num, real_den)))
            if (real_num as f64 / real_den as f64 - frame_rate).abs() > FRAME_RATE_TOLERANCE =>
        {
            Some(format!("fps={numerator}/{denominator}"))
        }
        _ => None,
    };

    let duration = document
        .get("format")
        .and_then(|format| format.get("duration"))
        .and_then(Value::as_str)
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .map(Duration::from_secs_f64);

    Ok(MediaInfo {
        width,
        height,
        frame_rate,
        duration,
        crop_filter: None,
        prune_filter,
    })
}

/// Parse an ffprobe rational such as `24000/1001`. Zero terms yield `None`.
fn parse_rational(value: &str) -> Option<(u64, u64)> {
    let (numerator, denominator) = value.split_once('/')?;
    let numerator = numerator.trim().parse::<u64>().ok()?;
    let denominator = denominator.trim().parse::<u64>().ok()?;
    (numerator > 0 && denominator > 0).then_some((numerator, denominator))
}

/// Pick the most frequent `crop=w:h:x:y` from `cropdetect` log output.
///
/// Entries with negative or zero sizes (reported for all-black frames) are
/// skipped, and a crop covering the whole frame counts as no crop.
pub(crate) fn parse_crop_output(stderr: &str, width: u32, height: u32) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();

    for line in stderr.lines() {
        let Some(start) = line.rfind("crop=") else {
            continue;
        };
        let crop = line[start..].split_whitespace().next().unwrap_or_default();
        let mut parts = crop["crop=".len()..].split(':');
        let size = (
            parts.next().and_then(|w| w.parse::<u32>().ok()),
            parts.next().and_then(|h| h.parse::<u32>().ok()),
        );
        if !matches!(size, (Some(w), Some(h)) if w > 0 && h > 0) {
            continue;
        }

        match counts.iter_mut().find(|(seen, _)| *seen == crop) {
            Some((_, count)) => *count += 1,
            None => counts.push((crop, 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (crop, count) in counts {
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((crop, count));
        }
    }

    let (crop, _) = best?;
    let full_frame = format!("crop={width}:{height}:0:0");
    (crop != full_frame).then(|| crop.to_string())
}
