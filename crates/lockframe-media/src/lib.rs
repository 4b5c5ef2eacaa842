#![deny(unreachable_patterns)]
//! Subject-locked vertical reframing.
//!
//! This crate provides:
//! - Subject discovery over sampled frames (first-match IoU clustering)
//! - A tracker locked onto one chosen subject, with a horizontal dead zone
//! - Fixed aspect crop planning, optional exponential center smoothing
//! - FFmpeg rawvideo decode/encode pipes and audio remuxing
//! - A YOLOv8 ONNX detector (behind the `onnx` feature)

pub mod command;
pub mod config;
pub mod crop_planner;
pub mod detector;
pub mod discovery;
pub mod error;
#[cfg(feature = "onnx")]
pub mod object_detector;
pub mod probe;
pub mod processor;
pub mod progress;
pub mod remux;
pub mod smoother;
pub mod synthetic;
pub mod thumbnail;
pub mod tracker;
pub mod video_io;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use config::{DiscoveryConfig, EncodeSettings, ReframeConfig, TrackerConfig};
pub use crop_planner::{apply_crop, CropPlanner};
pub use detector::{detect_confident, SubjectDetector};
pub use discovery::{discover_subjects, SubjectDiscovery, SubjectSummary, SubjectTrack};
pub use error::{MediaError, MediaResult};
#[cfg(feature = "onnx")]
pub use object_detector::{ObjectDetector, ObjectDetectorConfig};
pub use probe::{probe_video, VideoInfo};
pub use processor::{
    discover_subjects_in_file, reframe_video, ReframeJob, ReframeProcessor, ReframeSummary,
};
pub use progress::{FrameProgress, ProgressCallback};
pub use remux::merge_audio;
pub use smoother::ExponentialSmoother;
pub use thumbnail::{enhance_thumbnail, save_thumbnail};
pub use tracker::{LockedTracker, TrackUpdate, TrackerState};
pub use video_io::{FfmpegFrameReader, FfmpegFrameWriter, FrameSink, FrameSource, SampledFrames};
