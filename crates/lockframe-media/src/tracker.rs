//! Subject-locked tracker with dead-zone jitter suppression.
//!
//! Each frame, the detection that overlaps the last known box best is taken as
//! the subject. The reported horizontal center only moves when the new center
//! is at least `dead_zone_ratio * frame_width` away from the reported one, so
//! pixel-level detection noise never reaches the crop.
//!
//! When nothing overlaps, the tracker freezes on its last box and center and
//! compares the next frame against that stale box. There is no other
//! re-acquisition.

use image::RgbImage;
use lockframe_models::BoundingBox;
use tracing::{debug, trace};

use crate::config::TrackerConfig;
use crate::detector::{detect_confident, SubjectDetector};
use crate::error::MediaResult;

/// Mutable state of one locked tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerState {
    /// Last matched box
    pub target_box: BoundingBox,
    /// Last reported horizontal center
    pub prev_center: f64,
}

/// Result of a single frame update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackUpdate {
    /// Matched and moved past the dead zone.
    Moved { center: f64, iou: f64 },
    /// Matched, but the motion stayed inside the dead zone.
    Held { center: f64, iou: f64 },
    /// No detection overlapped the last known box.
    Lost { center: f64 },
}

impl TrackUpdate {
    /// Center to crop around.
    pub fn center(&self) -> f64 {
        match *self {
            TrackUpdate::Moved { center, .. }
            | TrackUpdate::Held { center, .. }
            | TrackUpdate::Lost { center } => center,
        }
    }
}

/// Follows one chosen subject through a single processing pass.
///
/// Call [`LockedTracker::get_center`] once per frame, in frame order. A new
/// tracker is needed for every pass.
pub struct LockedTracker<D> {
    detector: D,
    config: TrackerConfig,
    state: TrackerState,
    frames: u64,
    lost_frames: u64,
}

impl<D: SubjectDetector> LockedTracker<D> {
    /// Lock onto `initial_box`.
    pub fn new(detector: D, initial_box: BoundingBox, config: TrackerConfig) -> Self {
        debug!(bbox = %initial_box, "Tracker locked");
        Self {
            detector,
            config,
            state: TrackerState {
                target_box: initial_box,
                prev_center: initial_box.center_x(),
            },
            frames: 0,
            lost_frames: 0,
        }
    }

    /// Horizontal center of the subject in this frame.
    pub fn get_center(&mut self, frame: &RgbImage) -> MediaResult<f64> {
        Ok(self.update(frame)?.center())
    }

    /// Advance one frame and report what happened.
    pub fn update(&mut self, frame: &RgbImage) -> MediaResult<TrackUpdate> {
        let dead_zone_px = frame.width() as f64 * self.config.dead_zone_ratio;
        let detections = detect_confident(
            &self.detector,
            frame,
            self.config.class_id,
            self.config.conf_threshold,
        )?;
        self.frames += 1;

        // Best overlap wins; ties keep the earlier detection, zero overlap never qualifies
        let mut best: Option<(BoundingBox, f64)> = None;
        for detection in &detections {
            let score = detection.bbox.iou(&self.state.target_box);
            if score > best.map_or(0.0, |(_, s)| s) {
                best = Some((detection.bbox, score));
            }
        }

        let Some((matched, iou)) = best else {
            self.lost_frames += 1;
            metrics::counter!("lockframe_tracker_lost_frames_total").increment(1);
            trace!(
                frame = self.frames,
                candidates = detections.len(),
                "No overlapping detection, holding position"
            );
            return Ok(TrackUpdate::Lost {
                center: self.state.prev_center,
            });
        };

        self.state.target_box = matched;
        let new_center = matched.center_x();

        if (new_center - self.state.prev_center).abs() < dead_zone_px {
            return Ok(TrackUpdate::Held {
                center: self.state.prev_center,
                iou,
            });
        }

        self.state.prev_center = new_center;
        Ok(TrackUpdate::Moved {
            center: new_center,
            iou,
        })
    }

    /// Current tracker state.
    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    /// Frames processed so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames in which the subject was not found.
    pub fn lost_frames(&self) -> u64 {
        self.lost_frames
    }
}
