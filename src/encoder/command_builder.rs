use crate::analyzer::SubtitleProbe;
use crate::settings::{AudioEncoder, EncodingSettings, SubtitleMode, VideoEncoder};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Subtitle codec for soft subtitles in MP4
pub const SUBTITLE_CODEC: &str = "mov_text";

/// Concrete encoder used when burning subtitles into a stream-copy request
pub const BURN_FALLBACK_ENCODER: VideoEncoder = VideoEncoder::H264;

/// Parameters for one ffmpeg invocation
#[derive(Debug, Clone)]
pub struct EncodingParams {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Settings after downgrades; what the run actually uses
    pub settings: EncodingSettings,
    /// x264/x265 preset
    pub preset: String,
}

/// One-way substitution applied because a subtitle precondition failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Downgrade {
    /// `keep`/`burn` requested but the source has no subtitle stream
    NoSourceSubtitles { requested: SubtitleMode },
    /// `external`/`external-soft` requested but the file is missing
    ExternalFileMissing {
        requested: SubtitleMode,
        path: Option<String>,
    },
}

impl Display for Downgrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Downgrade::NoSourceSubtitles { requested } => {
                write!(f, "source has no subtitle stream; '{}' became 'remove'", requested)
            }
            Downgrade::ExternalFileMissing { requested, path } => write!(
                f,
                "external subtitle file {} is missing; '{}' became 'remove'",
                path.as_deref().unwrap_or("<unset>"),
                requested
            ),
        }
    }
}

/// Compiled ffmpeg invocation
#[derive(Debug, Clone)]
pub struct CommandPlan {
    pub args: Vec<String>,
    pub effective: EncodingSettings,
    pub downgrades: Vec<Downgrade>,
}

/// Apply subtitle downgrades. Never mutates `requested`.
pub async fn resolve_settings(
    input: &Path,
    requested: &EncodingSettings,
    probe: &dyn SubtitleProbe,
) -> (EncodingSettings, Vec<Downgrade>) {
    let mut settings = requested.clone();
    let mut downgrades = Vec::new();
    let mode = settings.subtitle.mode;

    if mode.uses_external_file() {
        let path = settings.subtitle.external_file_path.clone();
        let present = match &path {
            Some(p) => tokio::fs::try_exists(p).await.unwrap_or(false),
            None => false,
        };
        if !present {
            settings = settings.with_subtitles_removed();
            downgrades.push(Downgrade::ExternalFileMissing {
                requested: mode,
                path,
            });
        }
    }

    if settings.subtitle.mode.reads_source_subtitles()
        && probe.subtitle_stream_count(input).await == 0
    {
        let requested = settings.subtitle.mode;
        settings = settings.with_subtitles_removed();
        downgrades.push(Downgrade::NoSourceSubtitles { requested });
    }

    for downgrade in &downgrades {
        warn!("Subtitle downgrade for {}: {}", input.display(), downgrade);
    }
    (settings, downgrades)
}

/// Resolve downgrades, then build the argument list
pub async fn compile(
    input: &Path,
    output: &Path,
    requested: &EncodingSettings,
    preset: &str,
    probe: &dyn SubtitleProbe,
) -> CommandPlan {
    let (effective, downgrades) = resolve_settings(input, requested, probe).await;
    let params = EncodingParams {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        settings: effective,
        preset: preset.to_string(),
    };
    let args = build_ffmpeg_args(&params);
    info!("ffmpeg {}", args.join(" "));
    CommandPlan {
        args,
        effective: params.settings,
        downgrades,
    }
}

/// Build FFmpeg arguments for already-resolved settings
pub fn build_ffmpeg_args(params: &EncodingParams) -> Vec<String> {
    let settings = &params.settings;
    let mut args = vec![
        "-y".to_string(),
        "-nostdin".to_string(),
        "-i".to_string(),
        path_arg(&params.input),
    ];

    let external_soft = settings.subtitle.mode == SubtitleMode::ExternalSoft;
    if external_soft && let Some(sub) = &settings.subtitle.external_file_path {
        args.extend(["-i".to_string(), sub.clone()]);
    }

    args.extend(video_args(params));
    args.extend(audio_args(settings));
    args.extend(subtitle_args(settings));

    args.push(path_arg(&params.output));
    args
}

/// Encoder actually used for the video stream
pub fn effective_video_encoder(settings: &EncodingSettings) -> VideoEncoder {
    let encoder = settings.video.encoder;
    if encoder.is_copy() && settings.subtitle.mode.burns_into_video() {
        BURN_FALLBACK_ENCODER
    } else {
        encoder
    }
}

fn video_args(params: &EncodingParams) -> Vec<String> {
    let settings = &params.settings;
    if !settings.needs_video_encode() {
        return vec!["-c:v".to_string(), "copy".to_string()];
    }

    let encoder = effective_video_encoder(settings);
    if encoder != settings.video.encoder {
        info!(
            "Burning subtitles requires re-encoding; using {} instead of copy",
            encoder.ffmpeg_name()
        );
    }

    let mut args = vec!["-c:v".to_string(), encoder.ffmpeg_name().to_string()];

    if let Some(crf) = settings.video.quality.crf() {
        args.extend(["-crf".to_string(), crf.to_string()]);
    }
    args.extend(["-preset".to_string(), params.preset.clone()]);

    let mut filters = Vec::new();
    if let Some(height) = settings.video.resolution.height() {
        filters.push(format!("scale=-2:{}", height));
    }
    match settings.subtitle.mode {
        SubtitleMode::Burn => {
            let mut filter = format!("subtitles='{}'", escape_filter_path(&path_arg(&params.input)));
            if let Some(track) = settings.subtitle.track_index {
                filter.push_str(&format!(":si={}", track));
            }
            filters.push(filter);
        }
        SubtitleMode::External => {
            if let Some(sub) = &settings.subtitle.external_file_path {
                filters.push(format!(
                    "subtitles='{}':charenc=UTF-8",
                    escape_filter_path(sub)
                ));
            }
        }
        _ => {}
    }
    if !filters.is_empty() {
        args.extend(["-vf".to_string(), filters.join(",")]);
    }

    if let Some(fps) = settings.video.frame_rate.fps() {
        args.extend(["-r".to_string(), fps.to_string()]);
    }
    args
}

fn audio_args(settings: &EncodingSettings) -> Vec<String> {
    let audio = &settings.audio;
    let mut args = vec!["-c:a".to_string(), audio.encoder.ffmpeg_name().to_string()];
    if audio.encoder == AudioEncoder::Copy {
        return args;
    }
    if let Some(bitrate) = audio.quality.bitrate() {
        args.extend(["-b:a".to_string(), bitrate.to_string()]);
    }
    if let Some(channels) = audio.channels.count() {
        args.extend(["-ac".to_string(), channels.to_string()]);
    }
    args
}

fn subtitle_args(settings: &EncodingSettings) -> Vec<String> {
    let subtitle = &settings.subtitle;
    match subtitle.mode {
        SubtitleMode::Keep => {
            let mut args = vec!["-c:s".to_string(), SUBTITLE_CODEC.to_string()];
            if let Some(track) = subtitle.track_index {
                args.extend(
                    ["-map", "0:v", "-map", "0:a?", "-map"]
                        .iter()
                        .map(|s| s.to_string()),
                );
                args.push(format!("0:s:{}", track));
            }
            args
        }
        SubtitleMode::Burn | SubtitleMode::Remove | SubtitleMode::External => {
            vec!["-sn".to_string()]
        }
        SubtitleMode::ExternalSoft => vec![
            "-map".to_string(),
            "0:v".to_string(),
            "-map".to_string(),
            "0:a?".to_string(),
            "-map".to_string(),
            "1:0".to_string(),
            "-c:s".to_string(),
            SUBTITLE_CODEC.to_string(),
            "-metadata:s:s:0".to_string(),
            format!("language={}", subtitle.language.code()),
        ],
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Quote-safe path for the `subtitles` filter
pub fn escape_filter_path(path: &str) -> String {
    path.replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "'\\''")
}
