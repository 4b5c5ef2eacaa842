//! Source video properties.

use serde::{Deserialize, Serialize};

/// Properties of a decoded video stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoProps {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Frame count reported by the container (may be an estimate)
    pub total_frames: u64,
}

impl VideoProps {
    /// Create a new set of video properties.
    pub fn new(width: u32, height: u32, fps: f64, total_frames: u64) -> Self {
        Self {
            width,
            height,
            fps,
            total_frames,
        }
    }

    /// Bytes in one packed RGB24 frame.
    pub fn rgb_frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}
