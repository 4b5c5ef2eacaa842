//! Per-frame detector output.

use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;

/// COCO class index for "person", the class the reframing pipeline follows.
pub const PERSON_CLASS_ID: usize = 0;

/// A single detection produced for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Bounding box in pixel coordinates
    pub bbox: BoundingBox,
    /// Detection confidence score (0.0-1.0)
    pub confidence: f64,
}

impl Detection {
    /// Create a new detection.
    pub fn new(bbox: BoundingBox, confidence: f64) -> Self {
        Self { bbox, confidence }
    }

    /// Whether the detection clears a confidence floor (inclusive).
    #[inline]
    pub fn passes(&self, threshold: f64) -> bool {
        self.confidence >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_inclusive() {
        let det = Detection::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 0.4);
        assert!(det.passes(0.4));
        assert!(!det.passes(0.41));
    }
}
