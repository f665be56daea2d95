//! Classification of failed ffmpeg runs
//!
//! The diagnostic tail is matched against an ordered pattern table; the first
//! hit decides the category and message. Unmatched failures fall back to a
//! per-exit-code message, then to a generic one. Every message names the exit code.

use crate::store::ErrorCategory;
use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;
use thiserror::Error;

/// Outcome of a conversion that did not produce an output
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ConversionFailure {
    pub category: ErrorCategory,
    pub message: String,
    /// `None` when the process never ran or was killed by a signal
    pub exit_code: Option<i32>,
}

impl ConversionFailure {
    pub fn new(category: ErrorCategory, message: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            category,
            message: message.into(),
            exit_code,
        }
    }

    /// Failure that happened around the tool rather than inside it
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, message, None)
    }
}

struct ErrorPattern {
    regex: Regex,
    category: ErrorCategory,
    message: &'static str,
}

const PATTERNS: &[(&str, ErrorCategory, &str)] = &[
    (
        r"No such file or directory",
        ErrorCategory::FileNotFound,
        "File not found: check the input or subtitle file path",
    ),
    (
        r"Permission denied",
        ErrorCategory::PermissionDenied,
        "Permission denied: cannot read the input or write the output",
    ),
    (
        r"Invalid data found",
        ErrorCategory::CorruptInput,
        "Corrupt input: the file is damaged or not a supported format",
    ),
    (
        r"Unknown encoder",
        ErrorCategory::CodecUnsupported,
        "Encoder not supported: choose a different video codec",
    ),
    (
        r"Codec.*not found",
        ErrorCategory::CodecUnsupported,
        "Codec missing: this ffmpeg build does not include the codec",
    ),
    (
        r"Encoder.*not found",
        ErrorCategory::CodecUnsupported,
        "Encoder missing: check the ffmpeg installation or pick another codec",
    ),
    (
        r"Subtitle encoding currently only possible from text to text",
        ErrorCategory::SubtitleFormatUnsupported,
        "Subtitle format not supported: only text subtitles (SRT, ASS, VTT) can be converted",
    ),
    (
        r"Error opening subtitle file",
        ErrorCategory::SubtitleFileUnreadable,
        "Subtitle file error: the subtitle file could not be opened",
    ),
    (
        r"Invalid UTF-8",
        ErrorCategory::SubtitleEncodingUnsupported,
        "Subtitle encoding error: the subtitle file must be UTF-8",
    ),
    (
        r"Output file #0 does not contain any stream",
        ErrorCategory::StreamMappingFailed,
        "Stream mapping failed: the input has no usable video or audio stream",
    ),
    (
        r"Stream map.*matches no streams",
        ErrorCategory::StreamMappingFailed,
        "Stream mapping failed: the selected track does not exist",
    ),
    (
        r"No space left on device",
        ErrorCategory::DiskFull,
        "Disk full: free up space and try again",
    ),
    (
        r"Conversion failed",
        ErrorCategory::ConversionFailed,
        "Conversion failed: check the input format or try other settings",
    ),
    (
        r"Unsupported codec",
        ErrorCategory::CodecUnsupported,
        "Codec not supported: choose another codec or update ffmpeg",
    ),
];

const FATAL_PATTERNS: &[&str] = &[
    r"No such file or directory",
    r"Permission denied",
    r"command not found",
    r"Cannot find a matching stream",
];

fn case_insensitive(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern).case_insensitive(true).build().ok()
}

static ERROR_PATTERNS: LazyLock<Vec<ErrorPattern>> = LazyLock::new(|| {
    PATTERNS
        .iter()
        .filter_map(|(pattern, category, message)| {
            Some(ErrorPattern {
                regex: case_insensitive(pattern)?,
                category: *category,
                message: *message,
            })
        })
        .collect()
});

static FATAL: LazyLock<Vec<Regex>> =
    LazyLock::new(|| FATAL_PATTERNS.iter().filter_map(|p| case_insensitive(p)).collect());

/// Generic message for well-known ffmpeg exit codes
pub fn exit_code_message(code: i32) -> Option<&'static str> {
    match code {
        1 => Some("General error: check the input file or command arguments"),
        2 => Some("Invalid arguments: the ffmpeg command line is malformed"),
        126 => Some("ffmpeg cannot execute: permission denied or damaged binary"),
        127 => Some("ffmpeg is not installed"),
        137 => Some("Out of memory: try a lower quality or resolution"),
        139 => Some("Segmentation fault: unsupported codec or damaged file"),
        _ => None,
    }
}

fn code_label(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

/// Map a failed run to a category and a human-readable message
pub fn classify(exit_code: Option<i32>, diagnostics: &str) -> ConversionFailure {
    let label = code_label(exit_code);

    if let Some(hit) = ERROR_PATTERNS.iter().find(|p| p.regex.is_match(diagnostics)) {
        return ConversionFailure::new(
            hit.category,
            format!("{} (exit code {})", hit.message, label),
            exit_code,
        );
    }

    if let Some(message) = exit_code.and_then(exit_code_message) {
        return ConversionFailure::new(
            ErrorCategory::ExitCode,
            format!("{} (exit code {})", message, label),
            exit_code,
        );
    }

    ConversionFailure::new(
        ErrorCategory::Unknown,
        format!("Conversion failed: unknown error (exit code {})", label),
        exit_code,
    )
}

/// Diagnostics that mean retrying with the same inputs cannot succeed
pub fn is_fatal(diagnostics: &str) -> bool {
    FATAL.iter().any(|re| re.is_match(diagnostics))
}

/// Last five non-empty lines of the diagnostic output
pub fn error_details(diagnostics: &str) -> String {
    let lines: Vec<&str> = diagnostics
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pattern_compiles() {
        assert_eq!(ERROR_PATTERNS.len(), PATTERNS.len());
        assert_eq!(FATAL.len(), FATAL_PATTERNS.len());
    }

    #[test]
    fn each_pattern_yields_its_specific_message() {
        let samples = [
            ("input.mkv: No such file or directory", ErrorCategory::FileNotFound),
            ("out.mp4: Permission denied", ErrorCategory::PermissionDenied),
            ("input.mkv: Invalid data found when processing input", ErrorCategory::CorruptInput),
            ("Unknown encoder 'libfoo'", ErrorCategory::CodecUnsupported),
            ("Codec 'xyz' is not found", ErrorCategory::CodecUnsupported),
            ("Encoder libx265 not found", ErrorCategory::CodecUnsupported),
            (
                "Subtitle encoding currently only possible from text to text or bitmap to bitmap",
                ErrorCategory::SubtitleFormatUnsupported,
            ),
            ("Error opening subtitle file 'a.srt'", ErrorCategory::SubtitleFileUnreadable),
            ("Invalid UTF-8 in decoded subtitles text", ErrorCategory::SubtitleEncodingUnsupported),
            ("Output file #0 does not contain any stream", ErrorCategory::StreamMappingFailed),
            ("Stream map '0:s:3' matches no streams.", ErrorCategory::StreamMappingFailed),
            ("av_interleaved_write_frame(): No space left on device", ErrorCategory::DiskFull),
            ("Conversion failed!", ErrorCategory::ConversionFailed),
            ("Unsupported codec with id 1234", ErrorCategory::CodecUnsupported),
        ];

        for (text, category) in samples {
            let failure = classify(Some(42), text);
            assert_eq!(failure.category, category, "for {:?}", text);
            assert!(failure.message.contains("exit code 42"), "{}", failure.message);
            assert!(!failure.message.contains("unknown error"));
        }
    }

    #[test]
    fn first_match_wins() {
        let text = "No space left on device\nConversion failed!";
        assert_eq!(classify(Some(1), text).category, ErrorCategory::DiskFull);
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(
            classify(Some(1), "PERMISSION DENIED").category,
            ErrorCategory::PermissionDenied
        );
    }

    #[test]
    fn falls_back_to_exit_code_table() {
        let failure = classify(Some(137), "Killed");
        assert_eq!(failure.category, ErrorCategory::ExitCode);
        assert!(failure.message.starts_with("Out of memory"));
        assert!(failure.message.contains("137"));
    }

    #[test]
    fn falls_back_to_unknown() {
        let failure = classify(Some(77), "something odd happened");
        assert_eq!(failure.category, ErrorCategory::Unknown);
        assert_eq!(
            failure.message,
            "Conversion failed: unknown error (exit code 77)"
        );
        let signal = classify(None, "");
        assert!(signal.message.contains("exit code none"));
    }

    #[test]
    fn detects_fatal_output() {
        assert!(is_fatal("x.mkv: No such file or directory"));
        assert!(is_fatal("Cannot find a matching stream for unlabeled input pad"));
        assert!(!is_fatal("frame=  100 fps=25"));
    }

    #[test]
    fn details_keep_last_five_lines() {
        let text = "1\n2\n\n3\n4\n5\n6\n7\n";
        assert_eq!(error_details(text), "3\n4\n5\n6\n7");
        assert_eq!(error_details("only"), "only");
    }
}
