use crate::analyzer::SubtitleProbe;
use crate::encoder::command_builder::{Downgrade, compile};
use crate::encoder::errors::{ConversionFailure, classify, error_details, is_fatal};
use crate::encoder::progress::ProgressParser;
use crate::settings::EncodingSettings;
use crate::utils::file_size_string;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// One conversion to run
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub task_id: String,
    pub input: PathBuf,
    pub output: PathBuf,
    /// Settings as submitted; downgrades are applied by the converter
    pub settings: EncodingSettings,
}

/// Successful conversion
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    pub output: PathBuf,
    pub effective_settings: EncodingSettings,
    pub downgrades: Vec<Downgrade>,
}

/// Runs one conversion to completion, publishing running progress
#[async_trait]
pub trait Converter: Send + Sync + 'static {
    /// `progress` receives capped running percentages; never 100
    async fn convert(
        &self,
        request: ConversionRequest,
        progress: watch::Sender<u8>,
    ) -> Result<ConversionOutcome, ConversionFailure>;
}

/// Publish `pct` if it is higher than the last published value
pub fn publish_progress(progress: &watch::Sender<u8>, pct: u8) {
    progress.send_if_modified(|current| {
        if pct > *current {
            *current = pct;
            true
        } else {
            false
        }
    });
}

/// Converter backed by the ffmpeg executable
pub struct FfmpegConverter {
    program: String,
    preset: String,
    probe: Arc<dyn SubtitleProbe>,
}

impl FfmpegConverter {
    pub fn new(
        program: impl Into<String>,
        preset: impl Into<String>,
        probe: Arc<dyn SubtitleProbe>,
    ) -> Self {
        Self {
            program: program.into(),
            preset: preset.into(),
            probe,
        }
    }
}

#[async_trait]
impl Converter for FfmpegConverter {
    async fn convert(
        &self,
        request: ConversionRequest,
        progress: watch::Sender<u8>,
    ) -> Result<ConversionOutcome, ConversionFailure> {
        let id = &request.task_id;
        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ConversionFailure::internal(format!("Failed to create output directory: {}", e))
            })?;
        }

        let plan = compile(
            &request.input,
            &request.output,
            &request.settings,
            &self.preset,
            self.probe.as_ref(),
        )
        .await;

        info!(
            "[{}] Encoding: {} -> {}",
            id,
            request.input.display(),
            request.output.display()
        );

        let mut child = Command::new(&self.program)
            .args(&plan.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ConversionFailure::internal(format!("Failed to start {}: {}", self.program, e))
            })?;

        let mut parser = ProgressParser::new();
        if let Some(mut stderr) = child.stderr.take() {
            let mut buf = vec![0u8; 8192];
            loop {
                match stderr.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]);
                        trace!("[{}] {}", id, chunk.trim_end());
                        let had_duration = parser.duration_secs().is_some();
                        if parser.feed(&chunk) {
                            if !had_duration && let Some(d) = parser.duration_secs() {
                                debug!("[{}] Source duration {:.2}s", id, d);
                            }
                            publish_progress(&progress, parser.percent());
                        }
                    }
                    Err(e) => {
                        warn!("[{}] Failed to read ffmpeg output: {}", id, e);
                        break;
                    }
                }
            }
        }
        parser.finish();

        let status = child.wait().await.map_err(|e| {
            ConversionFailure::internal(format!("Failed to wait for ffmpeg: {}", e))
        })?;

        if status.success() {
            info!(
                "[{}] Encoded {} ({})",
                id,
                request.output.display(),
                file_size_string(&request.output)
            );
            return Ok(ConversionOutcome {
                output: request.output,
                effective_settings: plan.effective,
                downgrades: plan.downgrades,
            });
        }

        let diagnostics = parser.tail();
        let failure = classify(status.code(), &diagnostics);
        error!("[{}] Conversion failed: {}", id, failure.message);
        error!("[{}] ffmpeg output:\n{}", id, error_details(&diagnostics));
        if is_fatal(&diagnostics) {
            debug!("[{}] Failure is not recoverable with the same inputs", id);
        }

        // Partial output is useless
        if let Err(e) = tokio::fs::remove_file(&request.output).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("[{}] Failed to remove partial output: {}", id, e);
        }

        Err(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::FfprobeProbe;
    use crate::store::ErrorCategory;

    #[test]
    fn published_progress_only_rises() {
        let (tx, rx) = watch::channel(0u8);
        publish_progress(&tx, 10);
        publish_progress(&tx, 5);
        assert_eq!(*rx.borrow(), 10);
        publish_progress(&tx, 40);
        assert_eq!(*rx.borrow(), 40);
    }

    #[tokio::test]
    async fn missing_program_is_an_internal_failure() {
        let dir = tempfile::tempdir().unwrap();
        let converter = FfmpegConverter::new(
            "convertd-no-such-ffmpeg",
            "medium",
            Arc::new(FfprobeProbe::new("convertd-no-such-ffprobe")),
        );
        let (tx, _rx) = watch::channel(0u8);
        let request = ConversionRequest {
            task_id: "t1".to_string(),
            input: dir.path().join("t1.mkv"),
            output: dir.path().join("out").join("t1.mp4"),
            settings: EncodingSettings::default(),
        };
        let failure = converter.convert(request, tx).await.unwrap_err();
        assert_eq!(failure.category, ErrorCategory::Internal);
        assert!(dir.path().join("out").is_dir());
    }

    #[cfg(unix)]
    mod with_fake_tools {
        use super::*;
        use crate::encoder::Downgrade;
        use crate::settings::SubtitleMode;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        /// Write an executable shell script standing in for a media tool
        fn script(dir: &Path, name: &str, body: &str) -> String {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().into_owned()
        }

        /// Reports progress halfway through a ten second source, then
        /// writes its last argument
        const ENCODES: &str = r#"for last; do :; done
printf 'Input #0, matroska,webm, from in.mkv:\n  Duration: 00:00:10.00, start: 0.000000, bitrate: 900 kb/s\n' >&2
printf 'frame=  125 fps=25 q=28.0 size=512kB time=00:00:05.00 bitrate=838.9kbits/s\r' >&2
printf 'mp4' > "$last"
exit 0
"#;

        /// Starts writing, then fails like ffmpeg on a full disk
        const DISK_FULL: &str = r#"for last; do :; done
printf 'Input #0, matroska,webm, from in.mkv:\n  Duration: 00:00:10.00, start: 0.000000, bitrate: 900 kb/s\n' >&2
printf 'frame=   50 fps=25 q=28.0 size=256kB time=00:00:02.00 bitrate=838.9kbits/s\r' >&2
printf 'partial' > "$last"
printf 'av_interleaved_write_frame(): No space left on device\nConversion failed!\n' >&2
exit 1
"#;

        const NO_SUBTITLES: &str = "printf '{\"streams\":[]}'\n";

        fn request(dir: &Path, settings: EncodingSettings) -> ConversionRequest {
            let input = dir.join("t1.mkv");
            std::fs::write(&input, b"mkv").unwrap();
            ConversionRequest {
                task_id: "t1".to_string(),
                input,
                output: dir.join("out").join("t1.mp4"),
                settings,
            }
        }

        fn converter(dir: &Path, ffmpeg_body: &str) -> FfmpegConverter {
            let ffprobe = script(dir, "ffprobe", NO_SUBTITLES);
            let ffmpeg = script(dir, "ffmpeg", ffmpeg_body);
            FfmpegConverter::new(ffmpeg, "medium", Arc::new(FfprobeProbe::new(ffprobe)))
        }

        #[tokio::test]
        async fn successful_run_reports_progress_and_output() {
            let dir = tempfile::tempdir().unwrap();
            let converter = converter(dir.path(), ENCODES);
            let mut settings = EncodingSettings::default();
            settings.subtitle.mode = SubtitleMode::Remove;
            let request = request(dir.path(), settings);
            let output = request.output.clone();

            let (tx, rx) = watch::channel(0u8);
            let outcome = converter.convert(request, tx).await.unwrap();

            assert_eq!(outcome.output, output);
            assert_eq!(std::fs::read(&output).unwrap(), b"mp4");
            assert_eq!(*rx.borrow(), 50);
            assert!(outcome.downgrades.is_empty());
        }

        #[tokio::test]
        async fn failed_run_is_classified_and_partial_output_removed() {
            let dir = tempfile::tempdir().unwrap();
            let converter = converter(dir.path(), DISK_FULL);
            let mut settings = EncodingSettings::default();
            settings.subtitle.mode = SubtitleMode::Remove;
            let request = request(dir.path(), settings);
            let output = request.output.clone();

            let (tx, rx) = watch::channel(0u8);
            let failure = converter.convert(request, tx).await.unwrap_err();

            assert_eq!(failure.category, ErrorCategory::DiskFull);
            assert_eq!(failure.exit_code, Some(1));
            assert!(failure.message.contains("exit code 1"), "{}", failure.message);
            assert!(!output.exists());
            assert_eq!(*rx.borrow(), 20);
        }

        #[tokio::test]
        async fn keep_without_source_subtitles_downgrades_to_remove() {
            let dir = tempfile::tempdir().unwrap();
            let converter = converter(dir.path(), ENCODES);
            let mut settings = EncodingSettings::default();
            settings.subtitle.mode = SubtitleMode::Keep;
            let request = request(dir.path(), settings);

            let (tx, _rx) = watch::channel(0u8);
            let outcome = converter.convert(request, tx).await.unwrap();

            assert_eq!(outcome.effective_settings.subtitle.mode, SubtitleMode::Remove);
            assert_eq!(
                outcome.downgrades,
                vec![Downgrade::NoSourceSubtitles {
                    requested: SubtitleMode::Keep
                }]
            );
            assert!(outcome.output.exists());
        }
    }
}
