//! Audio remux of the cropped video with the source soundtrack.

use std::path::Path;

use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::config::EncodeSettings;
use crate::error::{MediaError, MediaResult};

/// Build the remux command: video from `silent_video`, audio (if any) from `source`.
pub fn remux_command(
    source: &Path,
    silent_video: &Path,
    output: &Path,
    encode: &EncodeSettings,
) -> FfmpegCommand {
    FfmpegCommand::new(silent_video, output)
        .extra_input(source)
        .map("0:v:0")
        // Trailing '?' keeps sources without audio working
        .map("1:a:0?")
        .video_codec(&encode.video_codec)
        .preset(&encode.preset)
        .crf(encode.crf)
        .audio_codec(&encode.audio_codec)
        .audio_bitrate(&encode.audio_bitrate)
        .output_args(["-movflags", "+faststart", "-shortest"])
}

/// Mux the processed video with the original audio into `output`.
pub async fn merge_audio(
    source: impl AsRef<Path>,
    silent_video: impl AsRef<Path>,
    output: impl AsRef<Path>,
    encode: &EncodeSettings,
    runner: &FfmpegRunner,
) -> MediaResult<()> {
    let source = source.as_ref();
    let silent_video = silent_video.as_ref();
    let output = output.as_ref();

    for path in [source, silent_video] {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
    }

    let cmd = remux_command(source, silent_video, output, encode);
    runner.run(&cmd).await?;

    info!(output = %output.display(), "Audio remux complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remux_maps_video_then_optional_audio() {
        let args = remux_command(
            Path::new("source.mp4"),
            Path::new("silent.mp4"),
            Path::new("short.mp4"),
            &EncodeSettings::default(),
        )
        .build_args();

        let maps: Vec<&String> = args
            .windows(2)
            .filter(|w| w[0] == "-map")
            .map(|w| &w[1])
            .collect();
        assert_eq!(maps, vec!["0:v:0", "1:a:0?"]);
        assert!(args.contains(&"aac".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("short.mp4"));
    }

    #[test]
    fn test_merge_audio_requires_inputs() {
        let result = tokio_test::block_on(merge_audio(
            "/nonexistent/source.mp4",
            "/nonexistent/silent.mp4",
            "/tmp/out.mp4",
            &EncodeSettings::default(),
            &FfmpegRunner::new(),
        ));
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
    }
}
