//! Progress reporting for the tracking pass and FFmpeg jobs.

use serde::{Deserialize, Serialize};

/// Frame-count progress of a sequential processing pass.
///
/// `fraction` is `processed / max(total, processed)`: it never decreases and
/// never exceeds 1.0, even when the container under-reports its frame count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameProgress {
    /// Frames fully processed so far
    pub processed: u64,
    /// Expected frame count (0 if unknown)
    pub total: u64,
}

impl FrameProgress {
    /// Create a progress counter for `total` expected frames.
    pub fn new(total: u64) -> Self {
        Self { processed: 0, total }
    }

    /// Record one more processed frame and return the new fraction.
    pub fn advance(&mut self) -> f64 {
        self.processed += 1;
        self.fraction()
    }

    /// Completed fraction in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        let denominator = self.total.max(self.processed);
        if denominator == 0 {
            return 0.0;
        }
        self.processed as f64 / denominator as f64
    }
}

/// Callback type for frame progress updates.
pub type ProgressCallback = Box<dyn Fn(f64) + Send + 'static>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_progress_reaches_one() {
        let mut progress = FrameProgress::new(4);
        let fractions: Vec<f64> = (0..4).map(|_| progress.advance()).collect();
        assert_eq!(fractions, vec![0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_frame_progress_underreported_total() {
        let mut progress = FrameProgress::new(2);
        let mut last = 0.0;
        for _ in 0..5 {
            let f = progress.advance();
            assert!(f >= last && f <= 1.0);
            last = f;
        }
        assert_eq!(last, 1.0);
    }

    #[test]
    fn test_frame_progress_unknown_total() {
        let mut progress = FrameProgress::new(0);
        assert_eq!(progress.fraction(), 0.0);
        assert_eq!(progress.advance(), 1.0);
    }
}
