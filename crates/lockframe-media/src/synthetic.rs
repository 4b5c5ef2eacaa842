//! Synthetic frame sources, detectors and sinks.
//!
//! These implement the public pipeline traits without FFmpeg or a model,
//! for dry runs, benchmarks and tests.

use std::sync::atomic::{AtomicU64, Ordering};

use image::{Rgb, RgbImage};
use lockframe_models::{Detection, VideoProps, PERSON_CLASS_ID};

use crate::detector::SubjectDetector;
use crate::error::{MediaError, MediaResult};
use crate::video_io::{FrameSink, FrameSource};

/// How a synthetic frame is painted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FramePattern {
    /// Every pixel the same color.
    Solid(Rgb<u8>),
    /// Each pixel encodes its own column: `R = x % 256`, `G = x / 256`.
    ColumnIndex,
}

/// In-memory video producing `props.total_frames` generated frames.
pub struct SyntheticVideo {
    props: VideoProps,
    pattern: FramePattern,
    emitted: u64,
}

impl SyntheticVideo {
    /// Video of mid-gray frames.
    pub fn blank(props: VideoProps) -> Self {
        Self::new(props, FramePattern::Solid(Rgb([128, 128, 128])))
    }

    /// Video whose pixels encode their column; see [`column_marker`].
    pub fn column_indexed(props: VideoProps) -> Self {
        Self::new(props, FramePattern::ColumnIndex)
    }

    pub fn new(props: VideoProps, pattern: FramePattern) -> Self {
        Self {
            props,
            pattern,
            emitted: 0,
        }
    }

    /// Frames handed out so far, decoded or skipped.
    pub fn frames_emitted(&self) -> u64 {
        self.emitted
    }

    fn render(&self) -> RgbImage {
        match self.pattern {
            FramePattern::Solid(color) => {
                RgbImage::from_pixel(self.props.width, self.props.height, color)
            }
            FramePattern::ColumnIndex => {
                RgbImage::from_fn(self.props.width, self.props.height, |x, _| {
                    Rgb([(x % 256) as u8, (x / 256) as u8, 0])
                })
            }
        }
    }
}

impl FrameSource for SyntheticVideo {
    fn props(&self) -> &VideoProps {
        &self.props
    }

    fn next_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        if self.emitted >= self.props.total_frames {
            return Ok(None);
        }
        self.emitted += 1;
        Ok(Some(self.render()))
    }

    fn skip_frame(&mut self) -> MediaResult<bool> {
        if self.emitted >= self.props.total_frames {
            return Ok(false);
        }
        self.emitted += 1;
        Ok(true)
    }
}

/// Source column encoded at `(x, y)` of a frame cut from a column-indexed video.
pub fn column_marker(frame: &RgbImage, x: u32, y: u32) -> u32 {
    let pixel = frame.get_pixel(x, y);
    pixel[0] as u32 + 256 * pixel[1] as u32
}

type Script = Box<dyn Fn(u64) -> MediaResult<Vec<Detection>> + Send + Sync>;

/// Detector that replays scripted detections, keyed by call number.
pub struct ScriptedDetector {
    class_id: usize,
    script: Script,
    calls: AtomicU64,
}

impl ScriptedDetector {
    /// Detector driven by a closure of the zero-based call number.
    pub fn from_fn<F>(script: F) -> Self
    where
        F: Fn(u64) -> MediaResult<Vec<Detection>> + Send + Sync + 'static,
    {
        Self {
            class_id: PERSON_CLASS_ID,
            script: Box::new(script),
            calls: AtomicU64::new(0),
        }
    }

    /// The same detections on every call.
    pub fn repeating(detections: Vec<Detection>) -> Self {
        Self::from_fn(move |_| Ok(detections.clone()))
    }

    /// One entry per call; calls past the end see no detections.
    pub fn sequence(frames: Vec<Vec<Detection>>) -> Self {
        Self::from_fn(move |call| Ok(frames.get(call as usize).cloned().unwrap_or_default()))
    }

    /// Returns `detections` on every call except `fail_at`, which fails.
    pub fn failing_at(fail_at: u64, detections: Vec<Detection>) -> Self {
        Self::from_fn(move |call| {
            if call == fail_at {
                Err(MediaError::detection_failed("scripted failure"))
            } else {
                Ok(detections.clone())
            }
        })
    }

    /// Only answer for this class; other classes see no detections.
    pub fn for_class(mut self, class_id: usize) -> Self {
        self.class_id = class_id;
        self
    }

    /// Number of detect calls served.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SubjectDetector for ScriptedDetector {
    fn detect(&self, _frame: &RgbImage, class_id: usize) -> MediaResult<Vec<Detection>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if class_id != self.class_id {
            return Ok(Vec::new());
        }
        (self.script)(call)
    }
}

/// Sink that records what it receives.
#[derive(Default)]
pub struct MemorySink {
    /// Frames received (only when created with [`MemorySink::keeping_frames`])
    pub frames: Vec<RgbImage>,
    /// `(width, height, column_marker(0, 0))` per frame received
    pub summaries: Vec<(u32, u32, u32)>,
    pub finished: bool,
    keep_frames: bool,
    fail_at: Option<usize>,
}

impl MemorySink {
    /// Sink that only keeps per-frame summaries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that also keeps every frame.
    pub fn keeping_frames() -> Self {
        Self {
            keep_frames: true,
            ..Self::default()
        }
    }

    /// Fail when asked to write frame number `index` (zero-based).
    pub fn failing_at(index: usize) -> Self {
        Self {
            fail_at: Some(index),
            ..Self::default()
        }
    }
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()> {
        if self.fail_at == Some(self.summaries.len()) {
            return Err(MediaError::ffmpeg_failed("scripted encoder failure", None, Some(1)));
        }
        self.summaries
            .push((frame.width(), frame.height(), column_marker(frame, 0, 0)));
        if self.keep_frames {
            self.frames.push(frame.clone());
        }
        Ok(())
    }

    fn finish(&mut self) -> MediaResult<()> {
        self.finished = true;
        Ok(())
    }
}
