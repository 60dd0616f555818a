//! The shared working directory of a run.
//!
//! All frame files of a run live flat in one directory, `upscale_video`
//! under the chosen temp directory. Library components receive its path
//! explicitly; [`WorkDir::enter`] additionally makes it the process's current
//! directory for as long as the returned guard lives.

use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::FixFramesError;
use crate::stage::StageTag;

/// Name of the run directory created under the temp directory.
pub const WORK_DIR_NAME: &str = "upscale_video";

/// Handle to a run's working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    /// Resolve and create the working directory.
    ///
    /// `base` defaults to [`std::env::temp_dir`]. The returned path is
    /// absolute.
    pub fn acquire(base: Option<&Path>) -> Result<Self, FixFramesError> {
        let base = base.map_or_else(env::temp_dir, Path::to_path_buf);
        let path = std::path::absolute(base.join(WORK_DIR_NAME))?;
        fs::create_dir_all(&path)?;
        log::debug!("Working directory: {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make this directory the process's current directory until the guard
    /// is dropped, when the previous current directory is restored.
    pub fn enter(&self) -> Result<CurrentDirGuard, FixFramesError> {
        let previous = env::current_dir()?;
        env::set_current_dir(&self.path)?;
        Ok(CurrentDirGuard { previous })
    }
}

/// Restores the previous current directory on drop.
#[derive(Debug)]
#[must_use = "the previous directory is restored as soon as the guard is dropped"]
pub struct CurrentDirGuard {
    previous: PathBuf,
}

impl Drop for CurrentDirGuard {
    fn drop(&mut self) {
        if let Err(error) = env::set_current_dir(&self.previous) {
            log::warn!(
                "Could not restore working directory {}: {error}",
                self.previous.display()
            );
        }
    }
}

/// Delete the `tag` files of `frames` in `work_dir`, skipping files that do
/// not exist. Returns how many files were removed.
pub(crate) fn remove_frame_files(
    work_dir: &Path,
    tag: StageTag,
    frames: impl IntoIterator<Item = u64>,
) -> Result<usize, FixFramesError> {
    let mut removed = 0;
    for frame in frames {
        match fs::remove_file(tag.frame_path(work_dir, frame)) {
            Ok(()) => removed += 1,
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }
    }
    Ok(removed)
}

/// Frame numbers of every `tag` file in `work_dir`, in directory order.
pub(crate) fn frame_files(work_dir: &Path, tag: StageTag) -> Result<Vec<u64>, FixFramesError> {
    let suffix = format!(".{}.png", tag.as_str());
    let mut frames = Vec::new();
    for entry in fs::read_dir(work_dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(frame) = name
            .strip_suffix(&suffix)
            .and_then(|stem| stem.parse().ok())
        {
            frames.push(frame);
        }
    }
    Ok(frames)
}
