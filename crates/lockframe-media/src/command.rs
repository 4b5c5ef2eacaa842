//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};

/// Placeholder path meaning "stdin" as an input or "stdout" as an output.
pub const PIPE: &str = "-";

/// Stderr lines kept for error reports.
const MAX_STDERR_LINES: usize = 40;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Primary input path
    input: PathBuf,
    /// Additional inputs, in order after the primary one
    extra_inputs: Vec<PathBuf>,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before the primary -i)
    input_args: Vec<String>,
    /// Output arguments (after every -i)
    output_args: Vec<String>,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command. Existing output is overwritten.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            extra_inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
        }
    }

    /// Add input arguments (before the primary -i).
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add another input file after the primary one.
    pub fn extra_input(mut self, input: impl AsRef<Path>) -> Self {
        self.extra_inputs.push(input.as_ref().to_path_buf());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Select a stream for the output (e.g. `0:v:0`, `1:a:0?`).
    pub fn map(self, stream: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(stream)
    }

    /// Raw RGB24 frames of a fixed size on the primary input.
    pub fn rawvideo_input(self, width: u32, height: u32, fps: f64) -> Self {
        self.input_args([
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-s".to_string(),
            format!("{}x{}", width, height),
            "-r".to_string(),
            format!("{}", fps),
        ])
    }

    /// Decode the video stream to packed RGB24 frames.
    pub fn rawvideo_output(self) -> Self {
        self.output_args(["-an", "-sn", "-f", "rawvideo", "-pix_fmt", "rgb24"])
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set output pixel format.
    pub fn pixel_format(self, pix_fmt: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(pix_fmt)
    }

    /// Set audio bitrate.
    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-v", "error", "-nostats"]
            .iter()
            .map(|a| a.to_string())
            .collect();

        args.extend(self.input_args.clone());
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        for path in &self.extra_inputs {
            args.push("-i".to_string());
            args.push(path.to_string_lossy().to_string());
        }

        args.extend(self.output_args.clone());
        args.push(self.output.to_string_lossy().to_string());

        args
    }

    /// Build a blocking `std::process::Command` for piped frame I/O.
    pub fn to_std_command(&self) -> MediaResult<std::process::Command> {
        let ffmpeg = check_ffmpeg()?;
        let mut cmd = std::process::Command::new(ffmpeg);
        cmd.args(self.build_args());
        Ok(cmd)
    }
}

/// Runs FFmpeg to completion, killing it on cancellation.
#[derive(Default)]
pub struct FfmpegRunner {
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
}

enum Outcome {
    Exited(std::process::ExitStatus),
    Cancelled,
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        let ffmpeg = check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;

        // Drained while FFmpeg runs; the last lines go into the error report.
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut messages = VecDeque::with_capacity(MAX_STDERR_LINES);
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                if messages.len() == MAX_STDERR_LINES {
                    messages.pop_front();
                }
                messages.push_back(line);
            }
            messages
        });

        let outcome = self.wait_for_completion(&mut child).await;
        let messages = stderr_task.await.unwrap_or_default();

        match outcome? {
            Outcome::Exited(status) if status.success() => Ok(()),
            Outcome::Exited(status) => Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                (!messages.is_empty()).then(|| Vec::from(messages).join("\n")),
                Some(status.code().unwrap_or(-1)),
            )),
            Outcome::Cancelled => Err(MediaError::Cancelled),
        }
    }

    /// Wait for the child, or kill it once cancellation is signalled.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<Outcome> {
        let outcome = match self.cancel_rx.clone() {
            Some(mut cancel_rx) => {
                tokio::select! {
                    status = child.wait() => Outcome::Exited(status?),
                    _ = cancellation(&mut cancel_rx) => Outcome::Cancelled,
                }
            }
            None => Outcome::Exited(child.wait().await?),
        };

        if let Outcome::Cancelled = outcome {
            info!("FFmpeg cancelled, killing process");
            let _ = child.kill().await;
        }
        Ok(outcome)
    }
}

/// Resolves once the flag reads true. Never resolves if the sender is gone.
async fn cancellation(cancel_rx: &mut watch::Receiver<bool>) {
    loop {
        if *cancel_rx.borrow_and_update() {
            return;
        }
        if cancel_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}
