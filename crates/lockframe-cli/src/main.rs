//! Subject-locked vertical reframing from the command line.
//!
//! `lockframe discover` ranks the people in a video and writes their
//! thumbnails; `lockframe reframe` follows one of them into a 9:16 cut.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lockframe_media::{
    check_ffmpeg, check_ffprobe, discover_subjects_in_file, reframe_video, save_thumbnail,
    ReframeConfig, SubjectDetector, SubjectSummary, SubjectTrack,
};
use lockframe_models::{AspectRatio, BoundingBox};

const NO_SUBJECTS: &str = "No stable subjects detected in the sampled frames.";

#[derive(Parser, Debug)]
#[command(
    name = "lockframe",
    version,
    about = "Follow one person through a video and cut it to a vertical frame"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rank the subjects in a video and write their thumbnails
    Discover {
        /// Input video
        input: PathBuf,

        /// Directory for thumbnails and subjects.json
        #[arg(long, default_value = "subjects", value_name = "DIR")]
        out_dir: PathBuf,

        #[command(flatten)]
        opts: CommonOpts,
    },
    /// Reframe a video around one subject
    Reframe {
        /// Input video
        input: PathBuf,

        /// Output video
        output: PathBuf,

        /// Subject box in source pixels
        #[arg(long = "box", value_name = "X1,Y1,X2,Y2", conflicts_with = "subject")]
        bbox: Option<BoundingBox>,

        /// 1-based rank from a discovery pass run first
        #[arg(long, value_name = "N", required_unless_present = "bbox")]
        subject: Option<usize>,

        /// Output aspect ratio
        #[arg(long, env = "LOCKFRAME_ASPECT_RATIO", value_name = "W:H")]
        aspect: Option<AspectRatio>,

        /// Smooth the crop center with this EMA alpha in (0, 1]
        #[arg(long, env = "LOCKFRAME_CENTER_SMOOTHING", value_name = "ALPHA")]
        smoothing: Option<f64>,

        #[command(flatten)]
        opts: CommonOpts,
    },
}

#[derive(Args, Debug)]
struct CommonOpts {
    /// YOLOv8 ONNX model
    #[arg(long, env = "LOCKFRAME_MODEL", default_value = "models/yolov8n.onnx")]
    model: PathBuf,

    /// Analyze every Nth frame during discovery
    #[arg(long, env = "LOCKFRAME_SAMPLE_RATE")]
    sample_rate: Option<u64>,

    /// Keep at most this many ranked subjects
    #[arg(long, env = "LOCKFRAME_MAX_SUBJECTS")]
    max_subjects: Option<usize>,
}

impl CommonOpts {
    fn apply(&self, config: &mut ReframeConfig) {
        if let Some(rate) = self.sample_rate {
            config.discovery.sample_rate = rate;
        }
        if let Some(max) = self.max_subjects {
            config.discovery.max_subjects = max;
        }
    }
}

/// One line of `subjects.json`.
#[derive(Serialize)]
struct SubjectRecord {
    #[serde(flatten)]
    summary: SubjectSummary,
    thumbnail: PathBuf,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lockframe=info,lockframe_media=info,ort=warn"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    check_ffmpeg()?;
    check_ffprobe()?;

    let mut config = ReframeConfig::from_env();

    match cli.command {
        Command::Discover { input, out_dir, opts } => {
            opts.apply(&mut config);
            config.validate()?;
            let detector = load_detector(&opts.model)?;

            let subjects = discover_subjects_in_file(detector, &input, &config.discovery).await?;
            if subjects.is_empty() {
                println!("{}", NO_SUBJECTS);
                return Ok(());
            }
            write_subjects(&subjects, &out_dir)?;
        }
        Command::Reframe {
            input,
            output,
            bbox,
            subject,
            aspect,
            smoothing,
            opts,
        } => {
            opts.apply(&mut config);
            if let Some(aspect) = aspect {
                config.aspect_ratio = aspect;
            }
            if smoothing.is_some() {
                config.center_smoothing = smoothing;
            }
            config.validate()?;
            let detector = load_detector(&opts.model)?;

            let selected = match (bbox, subject) {
                (Some(bbox), _) => bbox,
                (None, Some(rank)) => {
                    let subjects =
                        discover_subjects_in_file(detector.clone(), &input, &config.discovery)
                            .await?;
                    pick_subject(&subjects, rank)?
                }
                (None, None) => bail!("Either --box or --subject is required"),
            };

            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Received interrupt, stopping after the current frame");
                    cancel_tx.send(true).ok();
                }
            });

            let summary = reframe_video(
                detector,
                &input,
                &output,
                selected,
                &config,
                Some(progress_logger()),
                Some(cancel_rx),
            )
            .await
            .with_context(|| format!("Failed to reframe {}", input.display()))?;

            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

#[cfg(feature = "onnx")]
fn load_detector(model: &Path) -> Result<Arc<dyn SubjectDetector + Send + Sync>> {
    use lockframe_media::{ObjectDetector, ObjectDetectorConfig};

    let detector = ObjectDetector::new(ObjectDetectorConfig {
        model_path: model.to_path_buf(),
        ..ObjectDetectorConfig::default()
    })?;
    Ok(Arc::new(detector))
}

#[cfg(not(feature = "onnx"))]
fn load_detector(model: &Path) -> Result<Arc<dyn SubjectDetector + Send + Sync>> {
    bail!(
        "Cannot load {}: lockframe was built without the `onnx` feature",
        model.display()
    )
}

/// Select the subject at 1-based `rank`.
fn pick_subject(subjects: &[SubjectTrack], rank: usize) -> Result<BoundingBox> {
    if subjects.is_empty() {
        bail!(NO_SUBJECTS);
    }
    match rank.checked_sub(1).and_then(|i| subjects.get(i)) {
        Some(track) => {
            info!(rank, bbox = %track.bbox, count = track.count, "Selected subject");
            Ok(track.bbox)
        }
        None => bail!(
            "Subject {} requested but only {} were found",
            rank,
            subjects.len()
        ),
    }
}

/// Save thumbnails as `subject_<rank>.png` and print the ranked summary.
fn write_subjects(subjects: &[SubjectTrack], out_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let mut records = Vec::with_capacity(subjects.len());
    for (i, track) in subjects.iter().enumerate() {
        let rank = i + 1;
        let path = out_dir.join(format!("subject_{}.png", rank));
        save_thumbnail(&track.thumbnail, &path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        records.push(SubjectRecord {
            summary: track.summary(rank),
            thumbnail: path,
        });
    }

    let json = serde_json::to_string_pretty(&records)?;
    std::fs::write(out_dir.join("subjects.json"), &json)?;
    println!("{}", json);
    info!(count = records.len(), dir = %out_dir.display(), "Subjects written");
    Ok(())
}

/// Log progress at each whole 10%.
fn progress_logger() -> lockframe_media::ProgressCallback {
    let last_decile = AtomicU64::new(0);
    Box::new(move |fraction| {
        let decile = (fraction * 10.0).floor() as u64;
        if last_decile.fetch_max(decile, Ordering::Relaxed) < decile {
            info!(percent = decile * 10, "Reframing");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use image::RgbImage;
    use lockframe_media::synthetic::{ScriptedDetector, SyntheticVideo};
    use lockframe_media::{discover_subjects, DiscoveryConfig};
    use lockframe_models::{Detection, VideoProps};

    fn track(bbox: BoundingBox) -> SubjectTrack {
        let detector = ScriptedDetector::repeating(vec![Detection::new(bbox, 0.9)]);
        let mut video = SyntheticVideo::blank(VideoProps::new(640, 360, 30.0, 1));
        discover_subjects(&detector, &mut video, &DiscoveryConfig::default())
            .unwrap()
            .remove(0)
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_reframe_with_box() {
        let cli = Cli::try_parse_from([
            "lockframe", "reframe", "in.mp4", "out.mp4", "--box", "10,20,110,220",
        ])
        .unwrap();
        match cli.command {
            Command::Reframe { bbox, subject, .. } => {
                assert_eq!(bbox, Some(BoundingBox::new(10.0, 20.0, 110.0, 220.0)));
                assert!(subject.is_none());
            }
            _ => panic!("expected reframe"),
        }
    }

    #[test]
    fn test_reframe_requires_a_selection() {
        assert!(Cli::try_parse_from(["lockframe", "reframe", "in.mp4", "out.mp4"]).is_err());
        assert!(Cli::try_parse_from([
            "lockframe", "reframe", "in.mp4", "out.mp4", "--box", "0,0,1,1", "--subject", "1",
        ])
        .is_err());
    }

    #[test]
    fn test_pick_subject_by_rank() {
        let subjects = vec![track(BoundingBox::new(10.0, 10.0, 60.0, 110.0))];
        assert_eq!(pick_subject(&subjects, 1).unwrap(), subjects[0].bbox);
        assert!(pick_subject(&subjects, 0).is_err());
        assert!(pick_subject(&subjects, 2).is_err());

        let err = pick_subject(&[], 1).unwrap_err();
        assert_eq!(err.to_string(), NO_SUBJECTS);
    }

    #[test]
    fn test_write_subjects_saves_thumbnails_and_json() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("subjects");
        let subjects = vec![track(BoundingBox::new(10.0, 10.0, 60.0, 110.0))];

        write_subjects(&subjects, &dir).unwrap();

        let thumb = image::open(dir.join("subject_1.png")).unwrap().to_rgb8();
        let expected: &RgbImage = &subjects[0].thumbnail;
        assert_eq!(thumb.dimensions(), expected.dimensions());

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("subjects.json")).unwrap())
                .unwrap();
        assert_eq!(json[0]["rank"], 1);
        assert_eq!(json[0]["count"], 1);
        assert!(json[0]["thumbnail"].as_str().unwrap().ends_with("subject_1.png"));
    }
}
