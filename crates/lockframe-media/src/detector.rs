//! Detector contract consumed by discovery and tracking.
//!
//! The object detection model is a black box: for a frame it returns boxes
//! and confidences for a requested class. Everything downstream of this trait
//! is deterministic and testable with synthetic detectors.

use std::sync::Arc;

use image::RgbImage;
use lockframe_models::Detection;

use crate::error::MediaResult;

/// Produces detections of one semantic class for a decoded frame.
///
/// Implementations must be deterministic per frame for tracking to be
/// reproducible. Boxes are in pixel coordinates of `frame`. An `Err` is fatal
/// for the frame being processed; callers propagate it rather than skipping.
pub trait SubjectDetector {
    fn detect(&self, frame: &RgbImage, class_id: usize) -> MediaResult<Vec<Detection>>;
}

impl<T: SubjectDetector + ?Sized> SubjectDetector for &T {
    fn detect(&self, frame: &RgbImage, class_id: usize) -> MediaResult<Vec<Detection>> {
        (**self).detect(frame, class_id)
    }
}

impl<T: SubjectDetector + ?Sized> SubjectDetector for Box<T> {
    fn detect(&self, frame: &RgbImage, class_id: usize) -> MediaResult<Vec<Detection>> {
        (**self).detect(frame, class_id)
    }
}

impl<T: SubjectDetector + ?Sized> SubjectDetector for Arc<T> {
    fn detect(&self, frame: &RgbImage, class_id: usize) -> MediaResult<Vec<Detection>> {
        (**self).detect(frame, class_id)
    }
}

/// Run the detector and keep detections at or above `threshold`, in detector order.
pub fn detect_confident<D: SubjectDetector + ?Sized>(
    detector: &D,
    frame: &RgbImage,
    class_id: usize,
    threshold: f64,
) -> MediaResult<Vec<Detection>> {
    let mut detections = detector.detect(frame, class_id)?;
    detections.retain(|d| d.passes(threshold));
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::ScriptedDetector;
    use lockframe_models::BoundingBox;

    #[test]
    fn test_detect_confident_filters_and_keeps_order() {
        let detector = ScriptedDetector::repeating(vec![
            Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9),
            Detection::new(BoundingBox::new(20.0, 0.0, 30.0, 10.0), 0.2),
            Detection::new(BoundingBox::new(40.0, 0.0, 50.0, 10.0), 0.5),
        ]);
        let frame = RgbImage::new(64, 16);

        let kept = detect_confident(&detector, &frame, 0, 0.5).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].bbox.x1, 0.0);
        assert_eq!(kept[1].bbox.x1, 40.0);
    }

    #[test]
    fn test_detector_through_arc() {
        let detector: Arc<dyn SubjectDetector + Send + Sync> = Arc::new(ScriptedDetector::repeating(
            vec![Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9)],
        ));
        let frame = RgbImage::new(16, 16);
        assert_eq!(detector.detect(&frame, 0).unwrap().len(), 1);
    }
}
