use crate::foundation::error::{KeyPath, WeaveError, WeaveResult};

/// Absolute 0-based frame index in timeline space.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

/// Half-open frame range `[start, end)` in timeline space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameRange {
    /// Inclusive range start.
    pub start: FrameIndex,
    /// Exclusive range end.
    pub end: FrameIndex,
}

impl FrameRange {
    /// Create a validated range with `start <= end`.
    pub fn new(start: FrameIndex, end: FrameIndex) -> WeaveResult<Self> {
        if start.0 > end.0 {
            return Err(WeaveError::config(
                KeyPath::root(),
                "frame range start must be <= end",
            ));
        }
        Ok(Self { start, end })
    }

    /// Range starting at `start` spanning `len` frames.
    pub fn at(start: u64, len: u64) -> Self {
        Self {
            start: FrameIndex(start),
            end: FrameIndex(start.saturating_add(len)),
        }
    }

    /// Number of frames contained in the range.
    pub fn len_frames(self) -> u64 {
        self.end.0.saturating_sub(self.start.0)
    }

    /// Return `true` when the range has no frames.
    pub fn is_empty(self) -> bool {
        self.start.0 == self.end.0
    }

    /// Number of frames shared by `self` and `other`.
    pub fn overlap(self, other: FrameRange) -> u64 {
        let lo = self.start.0.max(other.start.0);
        let hi = self.end.0.min(other.end.0);
        hi.saturating_sub(lo)
    }
}

/// Integer frames-per-second of the output timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Fps(u32);

impl Fps {
    pub fn new(fps: u32) -> WeaveResult<Self> {
        if fps == 0 {
            return Err(WeaveError::config(
                KeyPath::root().field("settings").field("fps"),
                "fps must be > 0",
            ));
        }
        Ok(Self(fps))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0)
    }

    /// Duration of one frame in seconds.
    pub fn frame_secs(self) -> f64 {
        1.0 / self.as_f64()
    }

    /// Round a duration in seconds to the nearest frame boundary, never below one frame.
    ///
    /// Callers validate that `secs` is finite and non-negative.
    pub fn frames_for_secs(self, secs: f64) -> u64 {
        let frames = (secs * self.as_f64()).round();
        if frames < 1.0 { 1 } else { frames as u64 }
    }

    /// Convert a frame count back into seconds.
    pub fn secs(self, frames: u64) -> f64 {
        frames as f64 / self.as_f64()
    }
}

impl TryFrom<u32> for Fps {
    type Error = String;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        if v == 0 {
            return Err("fps must be > 0".to_string());
        }
        Ok(Self(v))
    }
}

impl From<Fps> for u32 {
    fn from(v: Fps) -> u32 {
        v.0
    }
}
