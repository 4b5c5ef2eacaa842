//! Full discovery-then-track runs over synthetic 1080p video.

use lockframe_media::synthetic::{MemorySink, ScriptedDetector, SyntheticVideo};
use lockframe_media::{ReframeConfig, ReframeProcessor};
use lockframe_models::{BoundingBox, Detection, VideoProps};

const FRAMES: u64 = 150;

fn hd_props() -> VideoProps {
    VideoProps::new(1920, 1080, 30.0, FRAMES)
}

fn person(cx: f64, confidence: f64) -> Detection {
    Detection::new(BoundingBox::new(cx - 100.0, 200.0, cx + 100.0, 800.0), confidence)
}

/// Subject walking from x=400 to x=1400 across the clip.
fn walking_center(frame: u64) -> f64 {
    400.0 + frame as f64 * 1000.0 / (FRAMES - 1) as f64
}

#[test]
fn test_discovery_ranks_the_steady_subject_first() {
    let detector = ScriptedDetector::from_fn(|call| {
        let mut dets = vec![person(960.0, 0.9)];
        if call % 2 == 0 {
            dets.push(Detection::new(BoundingBox::new(1500.0, 100.0, 1600.0, 300.0), 0.8));
        }
        Ok(dets)
    });
    let processor = ReframeProcessor::new(&detector, ReframeConfig::default());

    let mut video = SyntheticVideo::column_indexed(hd_props());
    let subjects = processor.discover(&mut video).unwrap();

    // Frames 0, 20, ..., 140
    assert_eq!(detector.calls(), 8);
    assert_eq!(subjects.len(), 2);
    assert_eq!(subjects[0].count, 8);
    assert_eq!(subjects[0].bbox, BoundingBox::new(860.0, 200.0, 1060.0, 800.0));
    assert_eq!(subjects[1].count, 4);
    assert!(subjects[0].score > subjects[1].score);

    let thumb = &subjects[0].thumbnail;
    assert_eq!(thumb.height(), 256);
    assert!(thumb.width() < 256);
}

#[test]
fn test_crop_follows_a_walking_subject() {
    let detector = ScriptedDetector::from_fn(|call| {
        Ok(vec![person(walking_center(call), 0.9), person(1800.0, 0.95)])
    });
    let processor = ReframeProcessor::new(&detector, ReframeConfig::default());

    let mut sink = MemorySink::new();
    let job = processor
        .job(
            SyntheticVideo::column_indexed(hd_props()),
            &mut sink,
            person(400.0, 0.9).bbox,
        )
        .unwrap();
    assert_eq!(job.output_size(), (607, 1080));

    let mut fractions = Vec::new();
    let summary = job.run(|f| fractions.push(f)).unwrap();

    assert_eq!(summary.frames, FRAMES);
    assert_eq!(summary.lost_frames, 0);
    assert_eq!(fractions.len(), FRAMES as usize);
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*fractions.last().unwrap(), 1.0);

    assert!(sink.finished);
    assert_eq!(sink.summaries.len(), FRAMES as usize);
    assert!(sink.summaries.iter().all(|(w, h, _)| (*w, *h) == (607, 1080)));

    let starts: Vec<u32> = sink.summaries.iter().map(|(_, _, x)| *x).collect();
    assert!(starts.windows(2).all(|w| w[0] <= w[1]));
    assert!(starts.iter().all(|x| *x <= 1920 - 607));
    // round(400 - 303.5)
    assert_eq!(starts[0], 97);

    // The 38.4 px dead zone turns ~6.7 px steps into jumps every sixth frame,
    // so the last position trails the subject by less than one dead zone.
    let last = *starts.last().unwrap();
    assert!(last > 1097 - 39 && last <= 1097, "last x_start {}", last);
    let moves = starts.windows(2).filter(|w| w[0] != w[1]).count();
    assert!((20..=30).contains(&moves), "{} crop moves", moves);
}

#[test]
fn test_crop_holds_while_subject_is_hidden() {
    let detector = ScriptedDetector::from_fn(|call| {
        if (40..60).contains(&call) {
            Ok(Vec::new())
        } else {
            Ok(vec![person(1000.0, 0.9)])
        }
    });
    let processor = ReframeProcessor::new(&detector, ReframeConfig::default());

    let mut sink = MemorySink::new();
    let summary = processor
        .job(
            SyntheticVideo::column_indexed(VideoProps::new(1920, 1080, 30.0, 80)),
            &mut sink,
            person(1000.0, 0.9).bbox,
        )
        .unwrap()
        .run(|_| {})
        .unwrap();

    assert_eq!(summary.lost_frames, 20);
    assert!(sink.summaries.iter().all(|(_, _, x)| *x == 697));
}

#[test]
fn test_subject_near_edge_is_clamped() {
    let detector = ScriptedDetector::repeating(vec![person(1880.0, 0.9)]);
    let processor = ReframeProcessor::new(&detector, ReframeConfig::default());

    let mut sink = MemorySink::new();
    processor
        .job(
            SyntheticVideo::column_indexed(VideoProps::new(1920, 1080, 30.0, 5)),
            &mut sink,
            person(1880.0, 0.9).bbox,
        )
        .unwrap()
        .run(|_| {})
        .unwrap();

    assert!(sink.summaries.iter().all(|(_, _, x)| *x == 1313));
}
