use crate::error::AppError;
use crate::settings::EncodingSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::PathBuf;

/// Lifecycle state of a conversion task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// queued -> processing -> {completed | failed}. No self-transitions, so
    /// claiming a task for processing succeeds exactly once.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Processing) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Error taxonomy for failed conversions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    FileNotFound,
    PermissionDenied,
    CorruptInput,
    CodecUnsupported,
    SubtitleFormatUnsupported,
    SubtitleFileUnreadable,
    SubtitleEncodingUnsupported,
    StreamMappingFailed,
    DiskFull,
    ConversionFailed,
    /// Classified from the exit code alone
    ExitCode,
    /// Nothing matched
    Unknown,
    /// Store or queue fault while the task was running
    Internal,
}

impl Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = serde_json::to_value(self).map_err(|_| std::fmt::Error)?;
        f.write_str(value.as_str().unwrap_or("unknown"))
    }
}

/// Persisted state of one conversion task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    /// Name supplied by the submitter, for display only
    pub original_name: String,
    pub upload_filename: String,
    pub status: TaskStatus,
    pub progress_percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_location: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub encoding_settings: EncodingSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_token: Option<String>,
}

/// Input for creating a record
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub id: String,
    pub original_name: String,
    pub upload_filename: String,
    pub encoding_settings: EncodingSettings,
    pub owner_token: Option<String>,
}

impl TaskRecord {
    pub fn new(task: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id: task.id,
            original_name: task.original_name,
            upload_filename: task.upload_filename,
            status: TaskStatus::Queued,
            progress_percent: 0,
            output_location: None,
            error_category: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
            encoding_settings: task.encoding_settings,
            owner_token: task.owner_token,
        }
    }

    /// Apply a partial update, enforcing the state machine and the record
    /// invariants. The record is left untouched when the patch is rejected.
    ///
    /// - terminal records accept no further updates
    /// - `expiresAt` is set only when entering a terminal state, and always then
    /// - `outputLocation` only on completion, error fields only on failure
    /// - progress never decreases and is forced to 100 on completion
    pub fn apply(&mut self, patch: &TaskPatch, now: DateTime<Utc>) -> Result<(), AppError> {
        let next = match patch.status {
            Some(next) if !self.status.can_transition_to(next) => {
                return Err(AppError::InvalidTransition {
                    id: self.id.clone(),
                    from: self.status,
                    to: next,
                });
            }
            Some(next) => next,
            None if self.status.is_terminal() => {
                return Err(self.invalid(format!("task is already {}", self.status)));
            }
            None => self.status,
        };
        self.check_fields(patch, next)?;

        self.status = next;
        if let Some(progress) = patch.progress_percent {
            self.progress_percent = self.progress_percent.max(progress.min(100));
        }
        if next == TaskStatus::Completed {
            self.progress_percent = 100;
        }
        if let Some(output) = &patch.output_location {
            self.output_location = Some(output.clone());
        }
        if let Some(category) = patch.error_category {
            self.error_category = Some(category);
        }
        if let Some(message) = &patch.error_message {
            self.error_message = Some(message.clone());
        }
        if let Some(expires_at) = patch.expires_at {
            self.expires_at = Some(expires_at);
        }
        self.updated_at = now;
        Ok(())
    }

    fn check_fields(&self, patch: &TaskPatch, next: TaskStatus) -> Result<(), AppError> {
        let has_error = patch.error_category.is_some() || patch.error_message.is_some();
        match next {
            TaskStatus::Queued | TaskStatus::Processing => {
                if patch.expires_at.is_some() {
                    return Err(self.invalid("expiresAt is only set on a terminal state"));
                }
                if patch.output_location.is_some() {
                    return Err(self.invalid("outputLocation is only set on completion"));
                }
                if has_error {
                    return Err(self.invalid("error fields are only set on failure"));
                }
            }
            TaskStatus::Completed => {
                if patch.output_location.is_none() {
                    return Err(self.invalid("completion requires outputLocation"));
                }
                if patch.expires_at.is_none() {
                    return Err(self.invalid("completion requires expiresAt"));
                }
                if has_error {
                    return Err(self.invalid("error fields are only set on failure"));
                }
            }
            TaskStatus::Failed => {
                if patch.error_category.is_none()
                    || patch.error_message.as_deref().is_none_or(str::is_empty)
                {
                    return Err(self.invalid("failure requires an error category and message"));
                }
                if patch.expires_at.is_none() {
                    return Err(self.invalid("failure requires expiresAt"));
                }
                if patch.output_location.is_some() {
                    return Err(self.invalid("outputLocation is only set on completion"));
                }
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: impl Into<String>) -> AppError {
        AppError::InvalidUpdate {
            id: self.id.clone(),
            reason: reason.into(),
        }
    }
}

/// Partial update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub progress_percent: Option<u8>,
    pub output_location: Option<PathBuf>,
    pub error_category: Option<ErrorCategory>,
    pub error_message: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn processing(progress: u8) -> Self {
        Self {
            status: Some(TaskStatus::Processing),
            progress_percent: Some(progress),
            ..Self::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress_percent: Some(progress),
            ..Self::default()
        }
    }

    pub fn completed(output: PathBuf, expires_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            progress_percent: Some(100),
            output_location: Some(output),
            expires_at: Some(expires_at),
            ..Self::default()
        }
    }

    pub fn failed(category: ErrorCategory, message: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            error_category: Some(category),
            error_message: Some(message),
            expires_at: Some(expires_at),
            ..Self::default()
        }
    }

    /// Whether this patch moves the record into a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(|s| s.is_terminal())
    }
}
