//! Frame-sequential reframing: track, crop, encode.
//!
//! [`ReframeJob`] is the per-run loop. Each `next()` decodes exactly one
//! frame, locates the subject, crops, and hands the crop to the sink before
//! yielding the completed fraction. The job owns the run's only tracker.
//!
//! [`reframe_video`] and [`discover_subjects_in_file`] wire the loop to FFmpeg
//! decode/encode and run it on a blocking thread.

use std::path::Path;
use std::sync::Arc;

use lockframe_models::{BoundingBox, CropWindow};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::command::FfmpegRunner;
use crate::config::{DiscoveryConfig, ReframeConfig};
use crate::crop_planner::{apply_crop, CropPlanner};
use crate::detector::SubjectDetector;
use crate::discovery::{discover_subjects, SubjectTrack};
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_video;
use crate::progress::{FrameProgress, ProgressCallback};
use crate::remux::merge_audio;
use crate::smoother::ExponentialSmoother;
use crate::tracker::LockedTracker;
use crate::video_io::{FfmpegFrameReader, FfmpegFrameWriter, FrameSink, FrameSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Running,
    Finished,
    Failed,
}

/// One tracking pass over a video, as a lazy progress sequence.
///
/// Yields `processed / total` after every frame; the sequence is finite, never
/// decreasing, and ends after the sink is finished. The first error is
/// yielded once and ends the sequence; the sink is then dropped unfinished.
pub struct ReframeJob<D, S, W> {
    source: S,
    sink: W,
    tracker: LockedTracker<D>,
    planner: CropPlanner,
    smoother: Option<ExponentialSmoother>,
    progress: FrameProgress,
    cancel_rx: Option<watch::Receiver<bool>>,
    last_window: Option<CropWindow>,
    state: JobState,
}

impl<D, S, W> ReframeJob<D, S, W>
where
    D: SubjectDetector,
    S: FrameSource,
    W: FrameSink,
{
    /// Prepare a pass that follows `selected_box` through `source`.
    pub fn new(
        detector: D,
        source: S,
        sink: W,
        selected_box: BoundingBox,
        config: &ReframeConfig,
    ) -> MediaResult<Self> {
        config.validate()?;

        let props = *source.props();
        if props.width == 0 || props.height == 0 {
            return Err(MediaError::InvalidVideo("Source has no frame dimensions".to_string()));
        }

        let planner = CropPlanner::new(props.width, props.height, config.aspect_ratio);
        let smoother = config
            .center_smoothing
            .map(|alpha| ExponentialSmoother::new(selected_box.center_x(), alpha));

        Ok(Self {
            source,
            sink,
            tracker: LockedTracker::new(detector, selected_box, config.tracker.clone()),
            planner,
            smoother,
            progress: FrameProgress::new(props.total_frames),
            cancel_rx: None,
            last_window: None,
            state: JobState::Running,
        })
    }

    /// Stop with [`MediaError::Cancelled`] once the flag turns true.
    ///
    /// Checked between frames only.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Size of every frame handed to the sink.
    pub fn output_size(&self) -> (u32, u32) {
        (self.planner.target_width(), self.planner.target_height())
    }

    /// Window used for the most recent frame.
    pub fn last_window(&self) -> Option<CropWindow> {
        self.last_window
    }

    pub fn progress(&self) -> FrameProgress {
        self.progress
    }

    pub fn tracker(&self) -> &LockedTracker<D> {
        &self.tracker
    }

    /// Drive the job to completion, reporting each fraction.
    pub fn run(mut self, mut on_progress: impl FnMut(f64)) -> MediaResult<ReframeSummary> {
        for fraction in self.by_ref() {
            on_progress(fraction?);
        }
        Ok(self.summary())
    }

    fn summary(&self) -> ReframeSummary {
        ReframeSummary {
            frames: self.progress.processed,
            lost_frames: self.tracker.lost_frames(),
            output_width: self.planner.target_width(),
            output_height: self.planner.target_height(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn step(&mut self) -> MediaResult<Option<f64>> {
        if self.is_cancelled() {
            info!(frames = self.progress.processed, "Reframe cancelled");
            return Err(MediaError::Cancelled);
        }

        let Some(frame) = self.source.next_frame()? else {
            self.sink.finish()?;
            info!(
                frames = self.progress.processed,
                lost_frames = self.tracker.lost_frames(),
                "Reframe pass finished"
            );
            return Ok(None);
        };

        let mut center = self.tracker.get_center(&frame)?;
        if let Some(smoother) = self.smoother.as_mut() {
            center = smoother.update(center);
        }

        let window = self.planner.plan(center);
        self.sink.write_frame(&apply_crop(&frame, &window))?;
        self.last_window = Some(window);
        metrics::counter!("lockframe_frames_reframed_total").increment(1);

        let fraction = self.progress.advance();
        debug!(
            frame = self.progress.processed,
            center,
            x_start = window.x_start,
            "Frame reframed"
        );
        Ok(Some(fraction))
    }
}

impl<D, S, W> Iterator for ReframeJob<D, S, W>
where
    D: SubjectDetector,
    S: FrameSource,
    W: FrameSink,
{
    type Item = MediaResult<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state != JobState::Running {
            return None;
        }
        match self.step() {
            Ok(Some(fraction)) => Some(Ok(fraction)),
            Ok(None) => {
                self.state = JobState::Finished;
                None
            }
            Err(e) => {
                self.state = JobState::Failed;
                Some(Err(e))
            }
        }
    }
}

/// Outcome of a completed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReframeSummary {
    pub frames: u64,
    /// Frames where the subject was not found and the crop held still
    pub lost_frames: u64,
    pub output_width: u32,
    pub output_height: u32,
}

/// Discovery and tracking bound to one detector and configuration.
pub struct ReframeProcessor<D> {
    detector: D,
    config: ReframeConfig,
}

impl<D: SubjectDetector> ReframeProcessor<D> {
    pub fn new(detector: D, config: ReframeConfig) -> Self {
        Self { detector, config }
    }

    pub fn config(&self) -> &ReframeConfig {
        &self.config
    }

    /// Rank candidate subjects in `source`.
    pub fn discover<S: FrameSource + ?Sized>(&self, source: &mut S) -> MediaResult<Vec<SubjectTrack>> {
        discover_subjects(&self.detector, source, &self.config.discovery)
    }

    /// Start a tracking pass locked onto `selected_box`.
    pub fn job<S: FrameSource, W: FrameSink>(
        &self,
        source: S,
        sink: W,
        selected_box: BoundingBox,
    ) -> MediaResult<ReframeJob<&D, S, W>> {
        ReframeJob::new(&self.detector, source, sink, selected_box, &self.config)
    }
}

/// Probe and decode `input`, then run subject discovery on a blocking thread.
pub async fn discover_subjects_in_file<D>(
    detector: Arc<D>,
    input: impl AsRef<Path>,
    config: &DiscoveryConfig,
) -> MediaResult<Vec<SubjectTrack>>
where
    D: SubjectDetector + Send + Sync + 'static + ?Sized,
{
    let input = input.as_ref().to_path_buf();
    let info = probe_video(&input).await?;
    info!(
        path = %input.display(),
        width = info.width,
        height = info.height,
        frames = info.frame_count,
        "Discovering subjects"
    );

    let config = config.clone();
    tokio::task::spawn_blocking(move || {
        let mut reader = FfmpegFrameReader::open(&input, info.props())?;
        discover_subjects(&*detector, &mut reader, &config)
    })
    .await
    .map_err(|e| MediaError::internal(format!("Discovery task failed: {}", e)))?
}

/// Reframe `input` around `selected_box` and write the result to `output`.
///
/// The cropped stream is encoded to a temporary silent file, then remuxed
/// with the source audio. The temporary directory and every FFmpeg child are
/// released on all exit paths; `output` is only written once tracking has
/// succeeded for every frame.
pub async fn reframe_video<D>(
    detector: Arc<D>,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    selected_box: BoundingBox,
    config: &ReframeConfig,
    on_progress: Option<ProgressCallback>,
    cancel_rx: Option<watch::Receiver<bool>>,
) -> MediaResult<ReframeSummary>
where
    D: SubjectDetector + Send + Sync + 'static + ?Sized,
{
    config.validate()?;
    let input = input.as_ref().to_path_buf();
    let output = output.as_ref().to_path_buf();

    let info = probe_video(&input).await?;
    let props = info.props();
    if !info.has_audio {
        warn!(path = %input.display(), "Source has no audio stream; output will be silent");
    }
    if info.rotation != 0 {
        debug!(rotation = info.rotation, "Source is rotated; cropping the display orientation");
    }

    let work_dir = tempfile::Builder::new().prefix("lockframe-").tempdir()?;
    let silent_path = work_dir.path().join("silent.mp4");

    info!(
        input = %input.display(),
        output = %output.display(),
        bbox = %selected_box,
        frames = props.total_frames,
        "Starting reframe"
    );

    let task_config = config.clone();
    let task_input = input.clone();
    let task_silent = silent_path.clone();
    let task_cancel = cancel_rx.clone();

    let summary = tokio::task::spawn_blocking(move || -> MediaResult<ReframeSummary> {
        let reader = FfmpegFrameReader::open(&task_input, props)?;
        let planner = CropPlanner::new(props.width, props.height, task_config.aspect_ratio);
        let writer = FfmpegFrameWriter::create(
            &task_silent,
            planner.target_width(),
            planner.target_height(),
            props.fps,
            &task_config.encode,
        )?;

        let mut job = ReframeJob::new(&*detector, reader, writer, selected_box, &task_config)?;
        if let Some(rx) = task_cancel {
            job = job.with_cancel(rx);
        }
        job.run(|fraction| {
            if let Some(callback) = on_progress.as_ref() {
                callback(fraction);
            }
        })
    })
    .await
    .map_err(|e| MediaError::internal(format!("Reframe task failed: {}", e)))??;

    let mut runner = FfmpegRunner::new();
    if let Some(rx) = cancel_rx {
        runner = runner.with_cancel(rx);
    }
    let staged = staged_output(&output)?;
    merge_audio(&input, &silent_path, &staged, &config.encode, &runner).await?;
    staged
        .persist(&output)
        .map_err(|e| MediaError::Io(e.error))?;

    info!(
        output = %output.display(),
        frames = summary.frames,
        lost_frames = summary.lost_frames,
        width = summary.output_width,
        height = summary.output_height,
        "Reframe complete"
    );
    Ok(summary)
}

/// Scratch path beside `output` for the final mux. It is removed on drop,
/// so only a successful run ever puts a file at `output`.
fn staged_output(output: &Path) -> MediaResult<tempfile::TempPath> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    // FFmpeg picks the muxer from the extension.
    let suffix = output
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let file = tempfile::Builder::new()
        .prefix(".lockframe-")
        .suffix(&suffix)
        .tempfile_in(dir)?;
    Ok(file.into_temp_path())
}
