//! Frame pipes against stand-in `ffmpeg` scripts put first on PATH.
#![cfg(unix)]

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::mpsc;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use image::RgbImage;
use lockframe_media::{
    EncodeSettings, FfmpegFrameReader, FfmpegFrameWriter, FrameSink, FrameSource, MediaError,
};
use lockframe_models::VideoProps;
use tempfile::TempDir;

/// PATH is process-wide; tests in this file take turns.
static PATH_LOCK: Mutex<()> = Mutex::new(());

/// Writes 300 KB of log noise to stderr, well past a pipe buffer.
const NOISY_STDERR: &str = "head -c 300000 /dev/zero | tr '\\0' 'x' >&2";

struct FakeFfmpeg {
    _dir: TempDir,
    old_path: Option<OsString>,
    _guard: MutexGuard<'static, ()>,
}

impl FakeFfmpeg {
    fn install(script: &str) -> Self {
        let guard = PATH_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("ffmpeg");
        fs::write(&bin, format!("#!/bin/sh\n{script}\n")).unwrap();
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();

        let old_path = std::env::var_os("PATH");
        let mut paths = vec![dir.path().to_path_buf()];
        if let Some(old) = &old_path {
            paths.extend(std::env::split_paths(old));
        }
        std::env::set_var("PATH", std::env::join_paths(paths).unwrap());

        Self {
            _dir: dir,
            old_path,
            _guard: guard,
        }
    }
}

impl Drop for FakeFfmpeg {
    fn drop(&mut self) {
        match &self.old_path {
            Some(old) => std::env::set_var("PATH", old),
            None => std::env::remove_var("PATH"),
        }
    }
}

fn input_file(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("clip.mp4");
    fs::write(&path, b"not really a video").unwrap();
    path
}

/// Runs `f` on a worker thread, failing instead of hanging on a deadlock.
fn within<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(Duration::from_secs(10))
        .expect("frame pipe stalled")
}

#[test]
fn test_reader_survives_a_flood_of_stderr() {
    // One 8x8 RGB frame is 192 bytes
    let _ffmpeg = FakeFfmpeg::install(&format!("{NOISY_STDERR}\nhead -c 192 /dev/zero"));
    let dir = tempfile::tempdir().unwrap();
    let input = input_file(dir.path());

    let mut reader = FfmpegFrameReader::open(&input, VideoProps::new(8, 8, 30.0, 1)).unwrap();
    let frames = within(move || {
        let first = reader.next_frame().unwrap();
        let second = reader.next_frame().unwrap();
        (first.is_some(), second.is_none())
    });

    assert_eq!(frames, (true, true));
}

#[test]
fn test_writer_survives_a_flood_of_stderr() {
    let _ffmpeg = FakeFfmpeg::install(&format!("{NOISY_STDERR}\ncat > /dev/null"));
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("silent.mp4");

    let mut writer =
        FfmpegFrameWriter::create(&output, 64, 64, 30.0, &EncodeSettings::default()).unwrap();
    let result = within(move || {
        let frame = RgbImage::new(64, 64);
        for _ in 0..20 {
            writer.write_frame(&frame)?;
        }
        writer.finish()
    });

    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn test_decoder_failure_carries_stderr() {
    let _ffmpeg = FakeFfmpeg::install("echo 'clip.mp4: moov atom not found' >&2\nexit 1");
    let dir = tempfile::tempdir().unwrap();
    let input = input_file(dir.path());

    let mut reader = FfmpegFrameReader::open(&input, VideoProps::new(8, 8, 30.0, 1)).unwrap();
    let result = within(move || reader.next_frame());

    match result {
        Err(MediaError::FfmpegFailed { stderr, .. }) => {
            assert!(stderr.unwrap_or_default().contains("moov atom not found"));
        }
        other => panic!("expected FfmpegFailed, got {other:?}"),
    }
}
