//! Subject discovery over sampled frames.
//!
//! Detections from every `sample_rate`-th frame are folded into candidate
//! tracks by box overlap, then ranked by hit count weighted by mean area.
//!
//! Assignment is first-match: a detection joins the *first* track (in creation
//! order) whose IoU with it exceeds `match_iou`, even if a later track overlaps
//! more. The tracker, by contrast, picks the best overlap.

use std::cmp::Ordering;

use image::RgbImage;
use lockframe_models::BoundingBox;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::DiscoveryConfig;
use crate::detector::{detect_confident, SubjectDetector};
use crate::error::MediaResult;
use crate::thumbnail::{crop_region, enhance_thumbnail};
use crate::video_io::{FrameSource, SampledFrames};

/// A candidate subject accumulated across sampled frames.
#[derive(Debug, Clone)]
pub struct SubjectTrack {
    /// Most recent box assigned to this track
    pub bbox: BoundingBox,
    /// Number of detections absorbed
    pub count: u64,
    /// Sum of absorbed box areas
    pub area_sum: f64,
    /// `count * mean area`; zero until discovery finishes
    pub score: f64,
    /// Index of the frame that created the track
    pub first_frame: u64,
    /// Enhanced crop from the frame that created the track
    pub thumbnail: RgbImage,
}

impl SubjectTrack {
    fn seed(bbox: BoundingBox, frame_index: u64, thumbnail: RgbImage) -> Self {
        Self {
            bbox,
            count: 1,
            area_sum: bbox.area(),
            score: 0.0,
            first_frame: frame_index,
            thumbnail,
        }
    }

    fn absorb(&mut self, bbox: BoundingBox) {
        self.bbox = bbox;
        self.count += 1;
        self.area_sum += bbox.area();
    }

    /// Mean area of absorbed boxes.
    pub fn mean_area(&self) -> f64 {
        self.area_sum / self.count as f64
    }

    /// Serializable view without the thumbnail pixels.
    pub fn summary(&self, rank: usize) -> SubjectSummary {
        SubjectSummary {
            rank,
            bbox: self.bbox,
            count: self.count,
            mean_area: self.mean_area(),
            score: self.score,
            first_frame: self.first_frame,
        }
    }
}

/// Ranked subject as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct SubjectSummary {
    pub rank: usize,
    pub bbox: BoundingBox,
    pub count: u64,
    pub mean_area: f64,
    pub score: f64,
    pub first_frame: u64,
}

/// Sampled discovery pass.
pub struct SubjectDiscovery {
    config: DiscoveryConfig,
}

impl SubjectDiscovery {
    /// Create a discovery pass.
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    /// Scan `source` and return up to `max_subjects` tracks, best first.
    ///
    /// Consumes the source up to end of stream or the scan cap. An empty
    /// result means no stable subject was found; it is not an error.
    pub fn discover<D, S>(&self, detector: &D, source: &mut S) -> MediaResult<Vec<SubjectTrack>>
    where
        D: SubjectDetector + ?Sized,
        S: FrameSource + ?Sized,
    {
        self.config.validate()?;

        let mut tracks: Vec<SubjectTrack> = Vec::new();
        let mut sampled = 0u64;

        let mut frames = SampledFrames::new(source, self.config.sample_rate, self.config.scan_cap());
        for item in frames.by_ref() {
            let (frame_index, frame) = item?;
            sampled += 1;
            metrics::counter!("lockframe_discovery_frames_sampled_total").increment(1);

            let detections = detect_confident(
                detector,
                &frame,
                self.config.class_id,
                self.config.conf_threshold,
            )?;

            for detection in detections {
                let bbox = detection.bbox.truncated();
                self.assign(&mut tracks, bbox, frame_index, &frame);
            }
        }

        let scanned = frames.frames_scanned();
        let found = tracks.len();
        let ranked = self.rank(tracks);

        info!(
            frames_scanned = scanned,
            frames_sampled = sampled,
            tracks = found,
            returned = ranked.len(),
            "Subject discovery finished"
        );

        Ok(ranked)
    }

    /// First-match assignment of one detection.
    fn assign(
        &self,
        tracks: &mut Vec<SubjectTrack>,
        bbox: BoundingBox,
        frame_index: u64,
        frame: &RgbImage,
    ) {
        if let Some(track) = tracks
            .iter_mut()
            .find(|t| t.bbox.iou(&bbox) > self.config.match_iou)
        {
            track.absorb(bbox);
            return;
        }

        let thumbnail = enhance_thumbnail(&crop_region(frame, &bbox), self.config.thumbnail_size);
        debug!(frame = frame_index, bbox = %bbox, "New subject track");
        metrics::counter!("lockframe_discovery_tracks_created_total").increment(1);
        tracks.push(SubjectTrack::seed(bbox, frame_index, thumbnail));
    }

    /// Score, sort by descending score (stable), truncate.
    fn rank(&self, mut tracks: Vec<SubjectTrack>) -> Vec<SubjectTrack> {
        for track in &mut tracks {
            track.score = track.count as f64 * track.mean_area();
        }
        tracks.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        tracks.truncate(self.config.max_subjects);
        tracks
    }
}

/// Run a discovery pass with `config`. See [`SubjectDiscovery::discover`].
pub fn discover_subjects<D, S>(
    detector: &D,
    source: &mut S,
    config: &DiscoveryConfig,
) -> MediaResult<Vec<SubjectTrack>>
where
    D: SubjectDetector + ?Sized,
    S: FrameSource + ?Sized,
{
    SubjectDiscovery::new(config.clone()).discover(detector, source)
}
