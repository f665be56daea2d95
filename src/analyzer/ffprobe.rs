use crate::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

/// Subtitle stream found in a source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    /// Position among the subtitle streams, as used by `-map 0:s:N`
    pub index: usize,
    pub codec: String,
    pub language: Option<String>,
    pub title: Option<String>,
}

impl SubtitleTrack {
    pub fn display_name(&self) -> String {
        let lang = self.language.as_deref().unwrap_or("Unknown");
        let title = self
            .title
            .as_ref()
            .map(|t| format!(" - {}", t))
            .unwrap_or_default();
        format!("{}: {} ({}){}", self.index, lang, self.codec.to_uppercase(), title)
    }
}

/// Source of subtitle-stream counts for the settings compiler
#[async_trait]
pub trait SubtitleProbe: Send + Sync {
    /// Number of subtitle streams in `input`; any failure counts as zero
    async fn subtitle_stream_count(&self, input: &Path) -> usize;
}

/// Probe backed by the ffprobe executable
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    program: String,
}

impl FfprobeProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

#[async_trait]
impl SubtitleProbe for FfprobeProbe {
    async fn subtitle_stream_count(&self, input: &Path) -> usize {
        count_subtitle_streams(&self.program, input).await
    }
}

/// Count subtitle streams, treating probe failures as "none"
pub async fn count_subtitle_streams(ffprobe: &str, input: &Path) -> usize {
    match probe_subtitle_tracks(ffprobe, input).await {
        Ok(tracks) => {
            debug!("Found {} subtitle stream(s) in {}", tracks.len(), input.display());
            tracks.len()
        }
        Err(e) => {
            warn!("Subtitle probe failed for {}: {}", input.display(), e);
            0
        }
    }
}

/// List the subtitle streams of `input`
pub async fn probe_subtitle_tracks(
    ffprobe: &str,
    input: &Path,
) -> Result<Vec<SubtitleTrack>, AppError> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-show_entries",
            "stream=index,codec_name:stream_tags=language,title",
            "-select_streams",
            "s",
            "-of",
            "json",
        ])
        .arg(input)
        .output()
        .await
        .map_err(|e| AppError::Analysis(format!("Failed to execute ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::Analysis(format!(
            "ffprobe failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }

    parse_subtitle_streams(&String::from_utf8_lossy(&output.stdout))
}

fn parse_subtitle_streams(json: &str) -> Result<Vec<SubtitleTrack>, AppError> {
    let data: StreamsOutput = serde_json::from_str(json)
        .map_err(|e| AppError::Analysis(format!("Failed to parse ffprobe output: {}", e)))?;

    Ok(data
        .streams
        .into_iter()
        .enumerate()
        .map(|(index, stream)| SubtitleTrack {
            index,
            codec: stream.codec_name.unwrap_or_else(|| "unknown".to_string()),
            language: stream.tags.as_ref().and_then(|t| t.language.clone()),
            title: stream.tags.and_then(|t| t.title),
        })
        .collect())
}

// JSON deserialization structures

#[derive(Debug, Deserialize)]
struct StreamsOutput {
    #[serde(default)]
    streams: Vec<RawStream>,
}

#[derive(Debug, Deserialize)]
struct RawStream {
    codec_name: Option<String>,
    tags: Option<StreamTags>,
}

#[derive(Debug, Deserialize)]
struct StreamTags {
    language: Option<String>,
    title: Option<String>,
}
