use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Storage roots and file naming
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory holding the three storage roots
    pub root: PathBuf,
    /// Staged input files, relative to `root`
    pub uploads_dir: String,
    /// Conversion outputs, relative to `root`
    pub outputs_dir: String,
    /// Task records, relative to `root`
    pub records_dir: String,
    /// Extension of staged inputs
    pub input_extension: String,
    /// Output container extension
    pub output_extension: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("storage"),
            uploads_dir: "uploads".to_string(),
            outputs_dir: "outputs".to_string(),
            records_dir: "tasks".to_string(),
            input_extension: "mkv".to_string(),
            output_extension: "mp4".to_string(),
        }
    }
}

/// External tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Maximum number of concurrent ffmpeg processes
    pub concurrency: usize,
    /// ffmpeg executable
    pub ffmpeg: String,
    /// ffprobe executable
    pub ffprobe: String,
    /// x264/x265 preset used when re-encoding
    pub preset: String,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            preset: "medium".to_string(),
        }
    }
}

/// Expiry horizons and post-completion grace delays
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Hours a completed task's files are kept
    pub success_hours: u64,
    /// Hours a failed task's files are kept
    pub failure_hours: u64,
    /// Hours a task that never reached a terminal state is kept
    pub orphan_hours: u64,
    /// Delay before the input of a completed task is removed
    pub input_grace_secs: u64,
    /// Delay before all files of a failed task are removed
    pub failure_grace_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            success_hours: 1,
            failure_hours: 24,
            orphan_hours: 48,
            input_grace_secs: 5 * 60,
            failure_grace_secs: 60 * 60,
        }
    }
}

/// Longest accepted retention horizon, ten years
pub const MAX_RETENTION_HOURS: u64 = 10 * 365 * 24;
/// Longest accepted grace delay, thirty days
pub const MAX_GRACE_SECS: u64 = 30 * 24 * 60 * 60;

impl RetentionConfig {
    pub fn success(&self) -> chrono::Duration {
        hours(self.success_hours)
    }

    pub fn failure(&self) -> chrono::Duration {
        hours(self.failure_hours)
    }

    pub fn orphan(&self) -> chrono::Duration {
        hours(self.orphan_hours)
    }

    pub fn input_grace(&self) -> Duration {
        Duration::from_secs(self.input_grace_secs)
    }

    pub fn failure_grace(&self) -> Duration {
        Duration::from_secs(self.failure_grace_secs)
    }
}

/// Capped so that `now + horizon` is always a representable timestamp
fn hours(h: u64) -> chrono::Duration {
    chrono::Duration::hours(h.min(MAX_RETENTION_HOURS) as i64)
}

/// Periodic expiry sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Whether the background sweep runs in this deployment
    pub enabled: bool,
    pub interval_minutes: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: 30,
        }
    }
}

/// Longest accepted sweep interval, one year
pub const MAX_INTERVAL_MINUTES: u64 = 365 * 24 * 60;

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write daily rolling log files here instead of stderr
    pub directory: Option<PathBuf>,
}
