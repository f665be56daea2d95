use crate::store::TaskStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task already exists: {0}")]
    TaskExists(String),

    #[error("Invalid task id: {0:?}")]
    InvalidTaskId(String),

    #[error("Task record {id} could not be parsed: {source}")]
    CorruptRecord {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task {id} cannot be updated: {reason}")]
    InvalidUpdate { id: String, reason: String },

    #[error("Invalid encoding settings: {0}")]
    InvalidSettings(String),

    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl AppError {
    /// Missing records are a normal, reportable outcome rather than a fault
    pub fn is_not_found(&self) -> bool {
        match self {
            AppError::TaskNotFound(_) => true,
            AppError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// A reader racing a writer sees a half-written record
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::CorruptRecord { .. })
    }
}
