pub mod types;

pub use types::*;

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub encoding: EncodingConfig,
    pub retention: RetentionConfig,
    pub cleanup: CleanupConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Self {
        let config_path = Self::config_path();

        if config_path.exists() {
            match Self::load_from_file(&config_path) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    return config;
                }
                Err(e) => {
                    warn!("Failed to load config: {}. Using defaults.", e);
                }
            }
        }

        Self::default()
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)
            .map_err(|e| AppError::Config(format!("Failed to write config file: {}", e)))?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("convertd")
            .join("config.toml")
    }

    /// Apply deployment tunables from the process environment
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(root) = var("CONVERTD_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(n) = parse_var(&var, "CONVERTD_CONCURRENCY") {
            self.encoding.concurrency = n;
        }
        if let Some(h) = parse_var(&var, "CONVERTD_SUCCESS_RETENTION_HOURS") {
            self.retention.success_hours = h;
        }
        if let Some(h) = parse_var(&var, "CONVERTD_FAILURE_RETENTION_HOURS") {
            self.retention.failure_hours = h;
        }
        if let Some(h) = parse_var(&var, "CONVERTD_ORPHAN_RETENTION_HOURS") {
            self.retention.orphan_hours = h;
        }
        if let Some(m) = parse_var(&var, "CONVERTD_CLEANUP_INTERVAL_MINUTES") {
            self.cleanup.interval_minutes = m;
        }
        if let Some(flag) = var("ENABLE_CLEANUP_SCHEDULER") {
            self.cleanup.enabled = flag.trim().eq_ignore_ascii_case("true");
        }
        if let Some(ffmpeg) = var("CONVERTD_FFMPEG") {
            self.encoding.ffmpeg = ffmpeg;
        }
        if let Some(ffprobe) = var("CONVERTD_FFPROBE") {
            self.encoding.ffprobe = ffprobe;
        }
        if let Some(dir) = var("CONVERTD_LOG_DIR") {
            self.logging.directory = Some(PathBuf::from(dir));
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), AppError> {
        if self.encoding.concurrency == 0 {
            return Err(AppError::Config(
                "Encoding concurrency must be at least 1".to_string(),
            ));
        }
        if self.cleanup.interval_minutes == 0 {
            return Err(AppError::Config(
                "Cleanup interval must be at least one minute".to_string(),
            ));
        }
        if self.cleanup.interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(AppError::Config(format!(
                "Cleanup interval must be at most {} minutes",
                MAX_INTERVAL_MINUTES
            )));
        }
        let horizons = [
            ("success", self.retention.success_hours),
            ("failure", self.retention.failure_hours),
            ("orphan", self.retention.orphan_hours),
        ];
        for (name, hours) in horizons {
            if hours > MAX_RETENTION_HOURS {
                return Err(AppError::Config(format!(
                    "The {} retention must be at most {} hours, got {}",
                    name, MAX_RETENTION_HOURS, hours
                )));
            }
        }
        let graces = [
            ("input", self.retention.input_grace_secs),
            ("failure", self.retention.failure_grace_secs),
        ];
        for (name, secs) in graces {
            if secs > MAX_GRACE_SECS {
                return Err(AppError::Config(format!(
                    "The {} grace delay must be at most {} seconds, got {}",
                    name, MAX_GRACE_SECS, secs
                )));
            }
        }
        if self.retention.failure_hours < self.retention.success_hours {
            return Err(AppError::Config(
                "Failed tasks must be retained at least as long as completed ones".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid number", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_tunables() {
        let config = AppConfig::default();
        assert_eq!(config.encoding.concurrency, 2);
        assert_eq!(config.retention.success_hours, 1);
        assert_eq!(config.retention.failure_hours, 24);
        assert_eq!(config.retention.orphan_hours, 48);
        assert_eq!(config.retention.input_grace_secs, 300);
        assert_eq!(config.retention.failure_grace_secs, 3600);
        assert_eq!(config.cleanup.interval_minutes, 30);
        assert!(!config.cleanup.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_overrides_apply() {
        let mut config = AppConfig::default();
        config.apply_vars(env(&[
            ("CONVERTD_CONCURRENCY", "4"),
            ("CONVERTD_FAILURE_RETENTION_HOURS", "72"),
            ("ENABLE_CLEANUP_SCHEDULER", "true"),
            ("CONVERTD_CLEANUP_INTERVAL_MINUTES", "5"),
        ]));
        assert_eq!(config.encoding.concurrency, 4);
        assert_eq!(config.retention.failure_hours, 72);
        assert!(config.cleanup.enabled);
        assert_eq!(config.cleanup.interval_minutes, 5);
    }

    #[test]
    fn unparseable_values_are_ignored() {
        let mut config = AppConfig::default();
        config.apply_vars(env(&[("CONVERTD_CONCURRENCY", "lots")]));
        assert_eq!(config.encoding.concurrency, 2);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut config = AppConfig::default();
        config.encoding.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unrepresentable_horizons() {
        let mut config = AppConfig::default();
        config.retention.success_hours = u64::MAX;
        config.retention.failure_hours = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.retention.orphan_hours = MAX_RETENTION_HOURS + 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.retention.failure_grace_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.cleanup.interval_minutes = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.retention.success_hours = MAX_RETENTION_HOURS;
        config.retention.failure_hours = MAX_RETENTION_HOURS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn huge_horizons_are_capped() {
        let retention = RetentionConfig {
            success_hours: u64::MAX,
            orphan_hours: i64::MAX as u64,
            ..RetentionConfig::default()
        };
        let cap = chrono::Duration::hours(MAX_RETENTION_HOURS as i64);
        assert_eq!(retention.success(), cap);
        assert_eq!(retention.orphan(), cap);
        assert_eq!(retention.failure(), chrono::Duration::hours(24));
        let cleanup = CleanupConfig {
            interval_minutes: u64::MAX,
            ..CleanupConfig::default()
        };
        assert_eq!(cleanup.interval(), std::time::Duration::from_secs(u64::MAX));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str("[encoding]\nconcurrency = 3\n").unwrap();
        assert_eq!(config.encoding.concurrency, 3);
        assert_eq!(config.encoding.ffmpeg, "ffmpeg");
        assert_eq!(config.retention.failure_hours, 24);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AppConfig::default();
        config.cleanup.enabled = true;
        config.save(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert!(loaded.cleanup.enabled);
    }
}
