use crate::config::EncodingConfig;
use std::process::Command;

/// Availability of the external tools
#[derive(Debug, Clone, Copy)]
pub struct DependencyStatus {
    pub ffmpeg: bool,
    pub ffprobe: bool,
}

impl DependencyStatus {
    /// Check all dependencies
    pub fn check(config: &EncodingConfig) -> Self {
        Self {
            ffmpeg: check_command(&config.ffmpeg, &["-version"]),
            ffprobe: check_command(&config.ffprobe, &["-version"]),
        }
    }

    pub fn all_present(&self) -> bool {
        self.ffmpeg && self.ffprobe
    }
}

/// Check if a command is available
fn check_command(cmd: &str, args: &[&str]) -> bool {
    Command::new(cmd)
        .args(args)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}
