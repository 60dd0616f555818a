//! Bad-frame selection.
//!
//! A [`FrameSet`] is the ordered, deduplicated set of 1-based frame indices
//! that a run restores. It is parsed from a compact textual spec of
//! comma-separated singletons and inclusive ranges, e.g. `1,3,5-7,10-12,15`,
//! and renders back to the same compact form.
//!
//! # Example
//!
//! ```
//! use fix_frames::FrameSet;
//!
//! let frames = FrameSet::parse("1,3,5-7,10-12,15")?;
//! assert_eq!(frames.len(), 9);
//! assert_eq!(frames.to_string(), "1,3,5-7,10-12,15");
//! # Ok::<(), fix_frames::FixFramesError>(())
//! ```

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::error::FixFramesError;

/// Ordered, deduplicated set of 1-based frame indices.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct FrameSet {
    frames: BTreeSet<u64>,
}

impl FrameSet {
    /// Parse a bad-frame spec.
    ///
    /// Tokens are separated by commas and are either a single index or an
    /// inclusive `low-high` range. Whitespace around tokens is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`FixFramesError::InvalidSpec`] for an empty spec, an empty or
    /// non-numeric token, an inverted range, or any index below 1.
    pub fn parse(spec: &str) -> Result<Self, FixFramesError> {
        let invalid = |reason: String| FixFramesError::InvalidSpec {
            spec: spec.to_string(),
            reason,
        };

        if spec.trim().is_empty() {
            return Err(invalid("no frames given".to_string()));
        }

        let mut frames = BTreeSet::new();
        for token in spec.split(',').map(str::trim) {
            if token.is_empty() {
                return Err(invalid("empty entry".to_string()));
            }

            match token.split_once('-') {
                Some((low, high)) => {
                    let low = parse_index(low.trim()).map_err(&invalid)?;
                    let high = parse_index(high.trim()).map_err(&invalid)?;
                    if low > high {
                        return Err(invalid(format!("range {low}-{high} is inverted")));
                    }
                    frames.extend(low..=high);
                }
                None => {
                    frames.insert(parse_index(token).map_err(&invalid)?);
                }
            }
        }

        Ok(Self { frames })
    }

    /// Number of frames in the set.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` if the set holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn contains(&self, frame: u64) -> bool {
        self.frames.contains(&frame)
    }

    /// Iterate over the frames in ascending order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = u64> + ExactSizeIterator + '_ {
        self.frames.iter().copied()
    }

    /// The lowest frame index, if any.
    pub fn first(&self) -> Option<u64> {
        self.frames.first().copied()
    }

    /// The highest frame index, if any.
    pub fn max(&self) -> Option<u64> {
        self.frames.last().copied()
    }

    /// Split the set into `shard_count` contiguous shards.
    ///
    /// Shard sizes differ by at most one, with the earlier shards taking the
    /// remainder. Every frame lands in exactly one shard and the shards keep
    /// ascending order. When the set holds fewer frames than `shard_count`,
    /// the trailing shards are empty. A `shard_count` of zero yields no
    /// shards.
    ///
    /// ```
    /// use fix_frames::FrameSet;
    ///
    /// let frames = FrameSet::parse("1-7")?;
    /// let shards = frames.partition(3);
    /// let rendered: Vec<String> = shards.iter().map(ToString::to_string).collect();
    /// assert_eq!(rendered, ["1-3", "4-5", "6-7"]);
    /// # Ok::<(), fix_frames::FixFramesError>(())
    /// ```
    pub fn partition(&self, shard_count: usize) -> Vec<FrameSet> {
        if shard_count == 0 {
            return Vec::new();
        }

        let base = self.len() / shard_count;
        let remainder = self.len() % shard_count;
        let mut frames = self.iter();

        (0..shard_count)
            .map(|index| {
                let size = base + usize::from(index < remainder);
                frames.by_ref().take(size).collect()
            })
            .collect()
    }
}

fn parse_index(value: &str) -> Result<u64, String> {
    if value.is_empty() {
        return Err("missing frame number".to_string());
    }
    let index = value
        .parse::<u64>()
        .map_err(|_| format!("{value:?} is not a frame number"))?;
    if index == 0 {
        return Err("frame numbers start at 1".to_string());
    }
    Ok(index)
}

impl FromStr for FrameSet {
    type Err = FixFramesError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        Self::parse(spec)
    }
}

impl FromIterator<u64> for FrameSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Self {
            frames: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a FrameSet {
    type Item = u64;
    type IntoIter = std::iter::Copied<std::collections::btree_set::Iter<'a, u64>>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter().copied()
    }
}

/// Renders the compact spec form: runs of two or more consecutive frames
/// collapse into `low-high`.
impl Display for FrameSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let mut runs: Vec<(u64, u64)> = Vec::new();
        for frame in self.iter() {
            match runs.last_mut() {
                Some((_, high)) if frame == *high + 1 => *high = frame,
                _ => runs.push((frame, frame)),
            }
        }

        for (position, (low, high)) in runs.into_iter().enumerate() {
            if position > 0 {
                write!(f, ",")?;
            }
            if low == high {
                write!(f, "{low}")?;
            } else {
                write!(f, "{low}-{high}")?;
            }
        }
        Ok(())
    }
}
