//! Run configuration.
//!
//! [`FixOptions`] is a builder that carries the choices of a run (scale,
//! touch-up stages, GPUs, directories) and the progress callback through the
//! pipeline without widening every function signature.
//!
//! # Example
//!
//! ```
//! use fix_frames::{DeviceList, FixOptions, Scale};
//!
//! let options = FixOptions::new()
//!     .with_scale(Scale::X4)
//!     .with_anime(true)
//!     .with_denoise(45)
//!     .with_devices(DeviceList::parse("0,1")?);
//!
//! assert_eq!(options.denoise().map(|level| level.get()), Some(30));
//! # Ok::<(), fix_frames::FixFramesError>(())
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::device::DeviceList;
use crate::progress::{NoOpProgress, ProgressCallback};
use crate::stage::{DenoiseLevel, Scale};

/// Options for a frame-fixing run.
///
/// A default-constructed value upscales 2x on GPU 0 with no touch-up stages,
/// working under the platform temp directory.
#[derive(Clone)]
pub struct FixOptions {
    pub(crate) scale: Scale,
    pub(crate) anime: bool,
    pub(crate) denoise: Option<DenoiseLevel>,
    pub(crate) devices: DeviceList,
    pub(crate) temp_dir: Option<PathBuf>,
    /// Keep `anime`/`denoise` files after the final stage.
    pub(crate) keep_intermediate: bool,
    pub(crate) progress: Arc<dyn ProgressCallback>,
}

impl Debug for FixOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FixOptions")
            .field("scale", &self.scale.factor())
            .field("anime", &self.anime)
            .field("denoise", &self.denoise.map(DenoiseLevel::get))
            .field("devices", &self.devices.to_string())
            .field("temp_dir", &self.temp_dir)
            .field("keep_intermediate", &self.keep_intermediate)
            .finish()
    }
}

impl Default for FixOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl FixOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            scale: Scale::default(),
            anime: false,
            denoise: None,
            devices: DeviceList::default(),
            temp_dir: None,
            keep_intermediate: false,
            progress: Arc::new(NoOpProgress),
        }
    }

    pub fn with_scale(mut self, scale: Scale) -> Self {
        self.scale = scale;
        self
    }

    /// Enable the anime deblur touch-up before upscaling.
    pub fn with_anime(mut self, anime: bool) -> Self {
        self.anime = anime;
        self
    }

    /// Request the denoise touch-up at `level`.
    ///
    /// Levels above 30 clamp to 30; zero or negative levels disable the
    /// stage, the same as never calling this.
    pub fn with_denoise(mut self, level: i64) -> Self {
        self.denoise = DenoiseLevel::from_requested(level);
        self
    }

    pub fn with_devices(mut self, devices: DeviceList) -> Self {
        self.devices = devices;
        self
    }

    /// Parent of the `upscale_video` work directory. Defaults to the
    /// platform temp directory.
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(temp_dir.into());
        self
    }

    /// Keep touch-up outputs once upscaling has finished.
    pub fn with_keep_intermediate(mut self, keep: bool) -> Self {
        self.keep_intermediate = keep;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    pub fn anime(&self) -> bool {
        self.anime
    }

    pub fn denoise(&self) -> Option<DenoiseLevel> {
        self.denoise
    }

    pub fn devices(&self) -> &DeviceList {
        &self.devices
    }

    pub fn temp_dir(&self) -> Option<&Path> {
        self.temp_dir.as_deref()
    }

    pub fn keep_intermediate(&self) -> bool {
        self.keep_intermediate
    }
}
