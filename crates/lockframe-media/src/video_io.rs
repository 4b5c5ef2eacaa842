//! Frame sources and sinks.
//!
//! The pipeline consumes frames strictly in order through [`FrameSource`] and
//! produces cropped frames through [`FrameSink`]. The FFmpeg implementations
//! pipe packed RGB24 frames through a child process; the child is killed and
//! reaped when the reader or writer is dropped before finishing, so no
//! process or pipe outlives an aborted run. Stderr is drained on a side
//! thread for the whole life of the child, so a chatty FFmpeg never blocks
//! on a full pipe while we block on the frame pipe.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};
use std::thread::{self, JoinHandle};

use image::RgbImage;
use lockframe_models::VideoProps;
use tracing::{debug, warn};

use crate::command::{FfmpegCommand, PIPE};
use crate::config::EncodeSettings;
use crate::error::{MediaError, MediaResult};

/// Sequential, non-restartable source of decoded frames.
pub trait FrameSource {
    /// Properties of the stream being decoded.
    fn props(&self) -> &VideoProps;

    /// Decode the next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> MediaResult<Option<RgbImage>>;

    /// Advance past one frame without keeping it. Returns `false` at end of stream.
    fn skip_frame(&mut self) -> MediaResult<bool> {
        Ok(self.next_frame()?.is_some())
    }
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn props(&self) -> &VideoProps {
        (**self).props()
    }

    fn next_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        (**self).next_frame()
    }

    fn skip_frame(&mut self) -> MediaResult<bool> {
        (**self).skip_frame()
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn props(&self) -> &VideoProps {
        (**self).props()
    }

    fn next_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        (**self).next_frame()
    }

    fn skip_frame(&mut self) -> MediaResult<bool> {
        (**self).skip_frame()
    }
}

/// Consumer of fixed-size output frames.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()>;

    /// Flush and close the output. Called once, after the last frame.
    fn finish(&mut self) -> MediaResult<()>;
}

impl<W: FrameSink + ?Sized> FrameSink for &mut W {
    fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()> {
        (**self).write_frame(frame)
    }

    fn finish(&mut self) -> MediaResult<()> {
        (**self).finish()
    }
}

impl<W: FrameSink + ?Sized> FrameSink for Box<W> {
    fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()> {
        (**self).write_frame(frame)
    }

    fn finish(&mut self) -> MediaResult<()> {
        (**self).finish()
    }
}

/// Decimating view over a frame source.
///
/// Yields `(index, frame)` for every index divisible by `sample_rate`, reads
/// and discards the frames in between, and stops once the index passes
/// `scan_cap` or the source ends, whichever comes first.
pub struct SampledFrames<'a, S: FrameSource + ?Sized> {
    source: &'a mut S,
    sample_rate: u64,
    scan_cap: u64,
    next_index: u64,
    done: bool,
}

impl<'a, S: FrameSource + ?Sized> SampledFrames<'a, S> {
    /// Create a sampler. A `sample_rate` of 0 is treated as 1.
    pub fn new(source: &'a mut S, sample_rate: u64, scan_cap: u64) -> Self {
        Self {
            source,
            sample_rate: sample_rate.max(1),
            scan_cap,
            next_index: 0,
            done: false,
        }
    }

    /// Number of frames read from the source so far (sampled or skipped).
    pub fn frames_scanned(&self) -> u64 {
        self.next_index
    }
}

impl<S: FrameSource + ?Sized> Iterator for SampledFrames<'_, S> {
    type Item = MediaResult<(u64, RgbImage)>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done && self.next_index <= self.scan_cap {
            let index = self.next_index;

            if index % self.sample_rate == 0 {
                let frame = self.source.next_frame();
                self.next_index += 1;
                return match frame {
                    Ok(Some(frame)) => Some(Ok((index, frame))),
                    Ok(None) => {
                        self.done = true;
                        None
                    }
                    Err(e) => {
                        self.done = true;
                        Some(Err(e))
                    }
                };
            }

            match self.source.skip_frame() {
                Ok(true) => self.next_index += 1,
                Ok(false) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Decodes a video file into RGB24 frames through an FFmpeg pipe.
pub struct FfmpegFrameReader {
    path: PathBuf,
    props: VideoProps,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: StderrTail,
    scratch: Vec<u8>,
    frames_read: u64,
}

impl FfmpegFrameReader {
    /// Start decoding `path`. `props` must come from probing the same file.
    pub fn open(path: impl AsRef<Path>, props: VideoProps) -> MediaResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        if props.width == 0 || props.height == 0 {
            return Err(MediaError::InvalidVideo(format!(
                "{} has no frame dimensions",
                path.display()
            )));
        }

        let mut child = FfmpegCommand::new(path, PIPE)
            .rawvideo_output()
            .to_std_command()?
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(MediaError::internal("FFmpeg stdout not captured"));
            }
        };
        let stderr = StderrTail::spawn(&mut child)?;

        debug!(
            path = %path.display(),
            width = props.width,
            height = props.height,
            "Started FFmpeg decoder"
        );

        Ok(Self {
            path: path.to_path_buf(),
            props,
            child: Some(child),
            stdout: Some(stdout),
            stderr,
            scratch: Vec::new(),
            frames_read: 0,
        })
    }

    /// Fill `buf` with the next frame. Returns `false` at end of stream.
    fn read_into(&mut self, buf: &mut [u8]) -> MediaResult<bool> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(false);
        };

        let mut filled = 0;
        while filled < buf.len() {
            match stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled == buf.len() {
            self.frames_read += 1;
            return Ok(true);
        }

        if filled > 0 {
            warn!(
                path = %self.path.display(),
                bytes = filled,
                "Discarding truncated trailing frame"
            );
        }
        self.finish_decoder()?;
        Ok(false)
    }

    /// Reap the decoder after end of stream and surface decode failures.
    fn finish_decoder(&mut self) -> MediaResult<()> {
        self.stdout = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let status = child.wait()?;
        let stderr = self.stderr.join();
        if status.success() {
            debug!(frames = self.frames_read, "FFmpeg decoder finished");
            return Ok(());
        }

        Err(MediaError::ffmpeg_failed(
            format!("Decoding {} failed", self.path.display()),
            (!stderr.trim().is_empty()).then_some(stderr),
            status.code(),
        ))
    }
}

impl FrameSource for FfmpegFrameReader {
    fn props(&self) -> &VideoProps {
        &self.props
    }

    fn next_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        let mut buf = vec![0u8; self.props.rgb_frame_len()];
        if !self.read_into(&mut buf)? {
            return Ok(None);
        }
        let frame = RgbImage::from_raw(self.props.width, self.props.height, buf)
            .ok_or_else(|| MediaError::internal("Failed to create frame buffer"))?;
        Ok(Some(frame))
    }

    fn skip_frame(&mut self) -> MediaResult<bool> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(self.props.rgb_frame_len(), 0);
        let result = self.read_into(&mut scratch);
        self.scratch = scratch;
        result
    }
}

impl Drop for FfmpegFrameReader {
    fn drop(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Encodes RGB24 frames piped to FFmpeg into a silent video file.
pub struct FfmpegFrameWriter {
    path: PathBuf,
    width: u32,
    height: u32,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: StderrTail,
    frames_written: u64,
}

impl FfmpegFrameWriter {
    /// Start an encoder for `width`x`height` frames at `fps`.
    pub fn create(
        path: impl AsRef<Path>,
        width: u32,
        height: u32,
        fps: f64,
        encode: &EncodeSettings,
    ) -> MediaResult<Self> {
        let path = path.as_ref();

        let mut child = encoder_command(path, width, height, fps, encode)
            .to_std_command()?
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(MediaError::internal("FFmpeg stdin not captured"));
            }
        };
        let stderr = StderrTail::spawn(&mut child)?;

        debug!(
            path = %path.display(),
            width,
            height,
            fps,
            "Started FFmpeg encoder"
        );

        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
            child: Some(child),
            stdin: Some(stdin),
            stderr,
            frames_written: 0,
        })
    }

    fn wait_encoder(&mut self) -> MediaResult<()> {
        self.stdin = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let status = child.wait()?;
        let stderr = self.stderr.join();
        if status.success() {
            return Ok(());
        }

        Err(MediaError::ffmpeg_failed(
            format!("Encoding {} failed", self.path.display()),
            (!stderr.trim().is_empty()).then_some(stderr),
            status.code(),
        ))
    }
}

impl FrameSink for FfmpegFrameWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(MediaError::FrameMismatch {
                expected_width: self.width,
                expected_height: self.height,
                width: frame.width(),
                height: frame.height(),
            });
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::internal("Encoder already finished"))?;

        match stdin.write_all(frame.as_raw()) {
            Ok(()) => {
                self.frames_written += 1;
                Ok(())
            }
            // The encoder died; its exit status carries the real reason.
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                self.wait_encoder()?;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn finish(&mut self) -> MediaResult<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush()?;
        }
        self.wait_encoder()?;
        debug!(
            path = %self.path.display(),
            frames = self.frames_written,
            "FFmpeg encoder finished"
        );
        Ok(())
    }
}

impl Drop for FfmpegFrameWriter {
    fn drop(&mut self) {
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Bytes of FFmpeg stderr kept for error reports.
const STDERR_TAIL_BYTES: usize = 16 * 1024;

/// Side thread reading a child's stderr until it closes.
struct StderrTail(Option<JoinHandle<String>>);

impl StderrTail {
    /// Take the child's stderr and start draining it. Kills the child if the
    /// thread cannot be started.
    fn spawn(child: &mut Child) -> MediaResult<Self> {
        let Some(pipe) = child.stderr.take() else {
            return Ok(Self(None));
        };
        match thread::Builder::new()
            .name("ffmpeg-stderr".to_string())
            .spawn(move || drain_tail(pipe))
        {
            Ok(handle) => Ok(Self(Some(handle))),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e.into())
            }
        }
    }

    /// Wait for stderr to close and return what was kept. Call after the
    /// child has exited.
    fn join(&mut self) -> String {
        self.0
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

/// Read `pipe` to the end, keeping only its last [`STDERR_TAIL_BYTES`].
fn drain_tail(mut pipe: impl Read) -> String {
    let mut tail: VecDeque<u8> = VecDeque::with_capacity(STDERR_TAIL_BYTES);
    let mut chunk = [0u8; 4096];
    loop {
        match pipe.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                tail.extend(&chunk[..n]);
                let excess = tail.len().saturating_sub(STDERR_TAIL_BYTES);
                tail.drain(..excess);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(tail.make_contiguous()).into_owned()
}

/// Encoder invocation for piped RGB24 frames.
///
/// 4:2:0 chroma needs even dimensions; odd crop widths (607 for 1080p at 9:16)
/// fall back to 4:4:4.
fn encoder_command(
    path: &Path,
    width: u32,
    height: u32,
    fps: f64,
    encode: &EncodeSettings,
) -> FfmpegCommand {
    let pix_fmt = if width % 2 == 0 && height % 2 == 0 {
        "yuv420p"
    } else {
        "yuv444p"
    };

    FfmpegCommand::new(PIPE, path)
        .rawvideo_input(width, height, fps)
        .output_arg("-an")
        .video_codec(&encode.video_codec)
        .preset(&encode.preset)
        .crf(encode.crf)
        .pixel_format(pix_fmt)
}
