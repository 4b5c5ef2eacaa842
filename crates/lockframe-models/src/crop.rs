//! Crop windows and target aspect ratios.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Horizontal crop window for one frame.
///
/// The vertical extent always spans the full frame height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropWindow {
    /// Left edge x-coordinate
    pub x_start: u32,
    /// Crop width
    pub width: u32,
    /// Crop height
    pub height: u32,
}

impl CropWindow {
    /// Create a new crop window.
    pub fn new(x_start: u32, width: u32, height: u32) -> Self {
        Self {
            x_start,
            width,
            height,
        }
    }

    /// Right edge x-coordinate (exclusive).
    #[inline]
    pub fn x_end(&self) -> u32 {
        self.x_start + self.width
    }
}

/// Target aspect ratio for output video.
///
/// Both parts are non-zero. Serialized as `"W:H"`, validated on the way in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AspectRatio {
    width: u32,
    height: u32,
}

impl AspectRatio {
    const fn new_unchecked(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Create an aspect ratio, rejecting a zero part.
    pub fn try_new(width: u32, height: u32) -> ModelResult<Self> {
        if width == 0 || height == 0 {
            return Err(ModelError::InvalidAspectRatio(format!("{}:{}", width, height)));
        }
        Ok(Self::new_unchecked(width, height))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Width of a window with this ratio at the given height, rounded down.
    pub fn width_for_height(&self, height: u32) -> u32 {
        (height as u64 * self.width as u64 / self.height as u64) as u32
    }

    /// Portrait 9:16 (TikTok, Instagram Reels, Shorts)
    pub const PORTRAIT: AspectRatio = AspectRatio::new_unchecked(9, 16);

    /// Square 1:1
    pub const SQUARE: AspectRatio = AspectRatio::new_unchecked(1, 1);
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::PORTRAIT
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

impl FromStr for AspectRatio {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ModelError::InvalidAspectRatio(s.to_string());
        let (w, h) = s.split_once(':').ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        Self::try_new(width, height).map_err(|_| invalid())
    }
}

impl TryFrom<String> for AspectRatio {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AspectRatio> for String {
    fn from(ratio: AspectRatio) -> Self {
        ratio.to_string()
    }
}
