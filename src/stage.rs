//! Stage vocabulary: file tags, models, and their parameters.
//!
//! Every frame image on disk is named `{index}.{tag}.png`, where the tag
//! names the stage that produced it. A stage reads files under the previous
//! stage's tag and writes files under its own.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};

use crate::error::FixFramesError;

/// Label of the stage that produced a frame image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageTag {
    /// Frames as extracted from the source video.
    Extract,
    /// Output of the anime deblur touch-up.
    Anime,
    /// Output of the denoise touch-up.
    Denoise,
    /// Final upscaled frames.
    Upscale,
}

impl StageTag {
    pub fn as_str(self) -> &'static str {
        match self {
            StageTag::Extract => "extract",
            StageTag::Anime => "anime",
            StageTag::Denoise => "denoise",
            StageTag::Upscale => "upscale",
        }
    }

    /// File name of a frame under this tag, e.g. `12.upscale.png`.
    pub fn file_name(self, frame: u64) -> String {
        format!("{frame}.{}.png", self.as_str())
    }

    /// Path of a frame under this tag inside `work_dir`.
    pub fn frame_path(self, work_dir: &Path, frame: u64) -> PathBuf {
        work_dir.join(self.file_name(frame))
    }
}

impl Display for StageTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Upscale factor. Only 2x and 4x models exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scale {
    #[default]
    X2,
    X4,
}

impl Scale {
    pub fn factor(self) -> u32 {
        match self {
            Scale::X2 => 2,
            Scale::X4 => 4,
        }
    }
}

impl TryFrom<u32> for Scale {
    type Error = FixFramesError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Scale::X2),
            4 => Ok(Scale::X4),
            other => Err(FixFramesError::InvalidScale(other)),
        }
    }
}

/// Denoise strength, always within `1..=30`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DenoiseLevel(u8);

impl DenoiseLevel {
    pub const MAX: u8 = 30;

    /// Interpret a requested denoise level.
    ///
    /// Levels above 30 clamp to 30. Zero or negative levels disable the
    /// denoise stage and return `None`.
    pub fn from_requested(level: i64) -> Option<Self> {
        if level <= 0 {
            None
        } else {
            Some(Self(level.min(i64::from(Self::MAX)) as u8))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

/// Model driven by an inference worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    /// Anime deblur and grain removal, 1x.
    Anime,
    /// Film grain removal, 1x, at the given strength.
    Denoise(DenoiseLevel),
    /// Super-resolution at the given scale.
    Upscale(Scale),
}

impl Model {
    /// Model file name under the models directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Model::Anime => "x_HurrDeblur_SubCompact_nf24-nc8_244k_net_g",
            Model::Denoise(_) => "drunet_color",
            Model::Upscale(Scale::X2) => "RealESRGAN_x2plus",
            Model::Upscale(Scale::X4) => "RealESRGAN_x4plus",
        }
    }

    /// Resolution factor the model applies.
    pub fn scale(self) -> u32 {
        match self {
            Model::Anime | Model::Denoise(_) => 1,
            Model::Upscale(scale) => scale.factor(),
        }
    }

    /// The tag of the files this model's stage writes.
    pub fn output_tag(self) -> StageTag {
        match self {
            Model::Anime => StageTag::Anime,
            Model::Denoise(_) => StageTag::Denoise,
            Model::Upscale(_) => StageTag::Upscale,
        }
    }
}

impl Display for Model {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.file_name())
    }
}
