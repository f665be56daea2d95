pub mod json;
pub mod lanes;
pub mod record;

pub use json::JsonTaskStore;
pub use lanes::WriteLanes;
pub use record::{ErrorCategory, NewTask, TaskPatch, TaskRecord, TaskStatus};

use crate::error::AppError;
use async_trait::async_trait;

/// Durable per-task records; the only authoritative source of task state
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Persist a new `queued` record. Fails if the id is already taken.
    async fn create(&self, task: NewTask) -> Result<TaskRecord, AppError>;

    /// Current record, or `AppError::TaskNotFound`
    async fn read(&self, id: &str) -> Result<TaskRecord, AppError>;

    /// Read-modify-write of the full record, serialized per id
    async fn update(&self, id: &str, patch: TaskPatch) -> Result<TaskRecord, AppError>;

    /// Ids of every stored record
    async fn list_ids(&self) -> Result<Vec<String>, AppError>;

    /// Remove the record; returns false if it was already gone
    async fn delete(&self, id: &str) -> Result<bool, AppError>;
}
