//! File layout convention
//!
//! Every artifact of task `X` lives in one of three roots and is named from `X`
//! alone, so cleanup can find all of a task's files without reading its record.

use crate::config::StorageConfig;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Generate a fresh task id
pub fn new_task_id() -> String {
    Uuid::new_v4().to_string()
}

/// Ids become file names, so only a conservative character set is accepted
pub fn is_valid_task_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Clone)]
pub struct StorageLayout {
    uploads: PathBuf,
    outputs: PathBuf,
    records: PathBuf,
    input_extension: String,
    output_extension: String,
}

impl StorageLayout {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            uploads: config.root.join(&config.uploads_dir),
            outputs: config.root.join(&config.outputs_dir),
            records: config.root.join(&config.records_dir),
            input_extension: config.input_extension.clone(),
            output_extension: config.output_extension.clone(),
        }
    }

    /// Layout rooted at `root` with default directory names
    pub fn under(root: impl Into<PathBuf>) -> Self {
        Self::new(&StorageConfig {
            root: root.into(),
            ..StorageConfig::default()
        })
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads
    }

    pub fn outputs_dir(&self) -> &Path {
        &self.outputs
    }

    pub fn records_dir(&self) -> &Path {
        &self.records
    }

    pub fn upload_filename(&self, id: &str) -> String {
        format!("{}.{}", id, self.input_extension)
    }

    pub fn upload_path(&self, id: &str) -> PathBuf {
        self.uploads.join(self.upload_filename(id))
    }

    pub fn output_path(&self, id: &str) -> PathBuf {
        self.outputs
            .join(format!("{}.{}", id, self.output_extension))
    }

    pub fn record_path(&self, id: &str) -> PathBuf {
        self.records.join(format!("{}.json", id))
    }

    /// Where an external subtitle for `id` is staged
    pub fn subtitle_path(&self, id: &str, extension: &str) -> PathBuf {
        self.uploads.join(format!("{}_subtitle.{}", id, extension))
    }

    /// Whether a file in the uploads root belongs to task `id`
    pub fn is_upload_of(&self, id: &str, file_name: &str) -> bool {
        if let Some(rest) = file_name.strip_prefix(id) {
            return rest.starts_with('.') || rest.starts_with("_subtitle.");
        }
        // Legacy subtitle staging: subtitle_<anything><id><anything>.<ext>
        file_name.starts_with("subtitle_") && file_name.contains(id) && file_name.contains('.')
    }

    /// Task id for a record file name, if it is one
    pub fn task_id_from_record(file_name: &str) -> Option<&str> {
        file_name
            .strip_suffix(".json")
            .filter(|id| is_valid_task_id(id))
    }

    /// Create all storage roots
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [&self.uploads, &self.outputs, &self.records] {
            std::fs::create_dir_all(dir)?;
        }
        info!("Storage directories ready under {}", self.uploads.display());
        Ok(())
    }
}
