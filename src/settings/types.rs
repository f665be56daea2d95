use crate::error::AppError;
use serde::{Deserialize, Deserializer, Serialize};

/// Video encoders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoEncoder {
    /// Stream copy, no re-encode
    #[default]
    Copy,
    H264,
    H265,
}

impl VideoEncoder {
    /// FFmpeg encoder name
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            VideoEncoder::Copy => "copy",
            VideoEncoder::H264 => "libx264",
            VideoEncoder::H265 => "libx265",
        }
    }

    pub fn is_copy(&self) -> bool {
        matches!(self, VideoEncoder::Copy)
    }
}

/// Video quality tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    #[default]
    Original,
    High,
    Medium,
    Low,
}

impl VideoQuality {
    /// Constant rate factor; `None` keeps the encoder default
    pub fn crf(&self) -> Option<u8> {
        match self {
            VideoQuality::Original => None,
            VideoQuality::High => Some(18),
            VideoQuality::Medium => Some(23),
            VideoQuality::Low => Some(28),
        }
    }
}

/// Target output height tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoResolution {
    #[default]
    #[serde(rename = "original")]
    Original,
    #[serde(rename = "2160p")]
    Uhd,
    #[serde(rename = "1080p")]
    FullHd,
    #[serde(rename = "720p")]
    Hd,
    #[serde(rename = "480p")]
    Sd,
    #[serde(rename = "360p")]
    Low,
}

impl VideoResolution {
    pub fn height(&self) -> Option<u32> {
        match self {
            VideoResolution::Original => None,
            VideoResolution::Uhd => Some(2160),
            VideoResolution::FullHd => Some(1080),
            VideoResolution::Hd => Some(720),
            VideoResolution::Sd => Some(480),
            VideoResolution::Low => Some(360),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoFrameRate {
    #[default]
    #[serde(rename = "original")]
    Original,
    #[serde(rename = "60")]
    Fps60,
    #[serde(rename = "30")]
    Fps30,
    #[serde(rename = "24")]
    Fps24,
}

impl VideoFrameRate {
    pub fn fps(&self) -> Option<u32> {
        match self {
            VideoFrameRate::Original => None,
            VideoFrameRate::Fps60 => Some(60),
            VideoFrameRate::Fps30 => Some(30),
            VideoFrameRate::Fps24 => Some(24),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoSettings {
    pub encoder: VideoEncoder,
    pub quality: VideoQuality,
    pub resolution: VideoResolution,
    pub frame_rate: VideoFrameRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoder {
    #[default]
    Copy,
    Aac,
    Mp3,
}

impl AudioEncoder {
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            AudioEncoder::Copy => "copy",
            AudioEncoder::Aac => "aac",
            AudioEncoder::Mp3 => "libmp3lame",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioQuality {
    #[default]
    Original,
    High,
    Medium,
    Low,
}

impl AudioQuality {
    pub fn bitrate(&self) -> Option<&'static str> {
        match self {
            AudioQuality::Original => None,
            AudioQuality::High => Some("256k"),
            AudioQuality::Medium => Some("192k"),
            AudioQuality::Low => Some("128k"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioChannels {
    #[default]
    Original,
    Stereo,
    Mono,
}

impl AudioChannels {
    pub fn count(&self) -> Option<u8> {
        match self {
            AudioChannels::Original => None,
            AudioChannels::Stereo => Some(2),
            AudioChannels::Mono => Some(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AudioSettings {
    pub encoder: AudioEncoder,
    pub quality: AudioQuality,
    pub channels: AudioChannels,
}

/// How subtitles are carried into the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubtitleMode {
    /// Remux source subtitle streams as soft subtitles
    #[default]
    Keep,
    /// Render a source subtitle stream into the picture
    Burn,
    /// Drop all subtitle streams
    Remove,
    /// Render an external subtitle file into the picture
    External,
    /// Mux an external subtitle file as a soft subtitle stream
    ExternalSoft,
}

impl SubtitleMode {
    pub fn burns_into_video(&self) -> bool {
        matches!(self, SubtitleMode::Burn | SubtitleMode::External)
    }

    pub fn reads_source_subtitles(&self) -> bool {
        matches!(self, SubtitleMode::Keep | SubtitleMode::Burn)
    }

    pub fn uses_external_file(&self) -> bool {
        matches!(self, SubtitleMode::External | SubtitleMode::ExternalSoft)
    }
}

impl std::fmt::Display for SubtitleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubtitleMode::Keep => "keep",
            SubtitleMode::Burn => "burn",
            SubtitleMode::Remove => "remove",
            SubtitleMode::External => "external",
            SubtitleMode::ExternalSoft => "external-soft",
        };
        f.write_str(name)
    }
}

/// ISO 639-2 tags offered for imported subtitles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleLanguage {
    #[default]
    Und,
    Chi,
    Eng,
    Jpn,
    Kor,
    Fre,
    Ger,
    Spa,
}

impl SubtitleLanguage {
    pub fn code(&self) -> &'static str {
        match self {
            SubtitleLanguage::Und => "und",
            SubtitleLanguage::Chi => "chi",
            SubtitleLanguage::Eng => "eng",
            SubtitleLanguage::Jpn => "jpn",
            SubtitleLanguage::Kor => "kor",
            SubtitleLanguage::Fre => "fre",
            SubtitleLanguage::Ger => "ger",
            SubtitleLanguage::Spa => "spa",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubtitleSettings {
    pub mode: SubtitleMode,
    /// Subtitle stream index within the source; `None` means automatic selection
    #[serde(default, deserialize_with = "deserialize_track_index")]
    pub track_index: Option<u32>,
    #[serde(default)]
    pub language: SubtitleLanguage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_file_path: Option<String>,
}

/// Encoding preferences captured when a task is created
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingSettings {
    #[serde(default)]
    pub video: VideoSettings,
    #[serde(default)]
    pub audio: AudioSettings,
    #[serde(default)]
    pub subtitle: SubtitleSettings,
}

impl EncodingSettings {
    /// Parse settings submitted as JSON; missing sections take their defaults
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        serde_json::from_str(json).map_err(|e| AppError::InvalidSettings(e.to_string()))
    }

    /// Copy of these settings with subtitles dropped entirely
    pub fn with_subtitles_removed(&self) -> Self {
        let mut next = self.clone();
        next.subtitle.mode = SubtitleMode::Remove;
        next.subtitle.external_file_path = None;
        next
    }

    /// Whether the video stream has to be re-encoded
    pub fn needs_video_encode(&self) -> bool {
        !self.video.encoder.is_copy() || self.subtitle.mode.burns_into_video()
    }
}

/// Accepts a non-negative integer, `null`, `"auto"` or a negative sentinel
fn deserialize_track_index<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Index(i64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Index(i)) if i < 0 => Ok(None),
        Some(Raw::Index(i)) => u32::try_from(i)
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("track index {} out of range", i))),
        Some(Raw::Text(s)) if s.eq_ignore_ascii_case("auto") || s.is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .parse::<u32>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid track index: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_names() {
        let json = r#"{
            "video": {"encoder": "h265", "quality": "high", "resolution": "720p", "frameRate": "30"},
            "audio": {"encoder": "mp3", "quality": "low", "channels": "mono"},
            "subtitle": {"mode": "external-soft", "trackIndex": 2, "language": "jpn", "externalFilePath": "/tmp/a.srt"}
        }"#;
        let settings: EncodingSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.video.encoder, VideoEncoder::H265);
        assert_eq!(settings.video.resolution, VideoResolution::Hd);
        assert_eq!(settings.video.frame_rate, VideoFrameRate::Fps30);
        assert_eq!(settings.audio.channels, AudioChannels::Mono);
        assert_eq!(settings.subtitle.mode, SubtitleMode::ExternalSoft);
        assert_eq!(settings.subtitle.track_index, Some(2));
        assert_eq!(settings.subtitle.language.code(), "jpn");
    }

    #[test]
    fn auto_and_negative_track_index_mean_no_selection() {
        for raw in [r#""auto""#, "-1", "null"] {
            let json = format!(r#"{{"mode": "keep", "trackIndex": {}}}"#, raw);
            let sub: SubtitleSettings = serde_json::from_str(&json).unwrap();
            assert_eq!(sub.track_index, None, "input {}", raw);
        }
        let sub: SubtitleSettings = serde_json::from_str(r#"{"mode": "keep"}"#).unwrap();
        assert_eq!(sub.track_index, None);
    }

    #[test]
    fn crf_is_monotonic_with_quality() {
        let high = VideoQuality::High.crf().unwrap();
        let medium = VideoQuality::Medium.crf().unwrap();
        let low = VideoQuality::Low.crf().unwrap();
        assert!(high < medium && medium < low);
        assert_eq!(VideoQuality::Original.crf(), None);
    }

    #[test]
    fn removing_subtitles_leaves_original_untouched() {
        let mut original = EncodingSettings::default();
        original.subtitle.mode = SubtitleMode::External;
        original.subtitle.external_file_path = Some("x.srt".into());

        let downgraded = original.with_subtitles_removed();
        assert_eq!(downgraded.subtitle.mode, SubtitleMode::Remove);
        assert_eq!(downgraded.subtitle.external_file_path, None);
        assert_eq!(original.subtitle.mode, SubtitleMode::External);
    }

    #[test]
    fn malformed_json_is_invalid_settings() {
        let err = EncodingSettings::from_json(r#"{"video": {"encoder": "vp9"}}"#).unwrap_err();
        assert!(matches!(err, AppError::InvalidSettings(_)));
        let partial = EncodingSettings::from_json(r#"{"audio": {"encoder": "copy"}}"#).unwrap();
        assert_eq!(partial.subtitle.mode, SubtitleMode::Keep);
    }
}
