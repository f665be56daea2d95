use super::lanes::WriteLanes;
use super::record::{NewTask, TaskPatch, TaskRecord};
use super::TaskStore;
use crate::error::AppError;
use crate::layout::{StorageLayout, is_valid_task_id};
use crate::utils::RetryPolicy;
use async_trait::async_trait;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info, warn};

/// One pretty-printed JSON document per task under the records root
#[derive(Debug)]
pub struct JsonTaskStore {
    layout: StorageLayout,
    lanes: WriteLanes,
    retry: RetryPolicy,
}

impl JsonTaskStore {
    pub fn new(layout: StorageLayout) -> Self {
        Self::with_retry(layout, RetryPolicy::default())
    }

    pub fn with_retry(layout: StorageLayout, retry: RetryPolicy) -> Self {
        Self {
            layout,
            lanes: WriteLanes::new(),
            retry,
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Number of ids with a live write lane
    pub fn active_lanes(&self) -> usize {
        self.lanes.len()
    }

    async fn read_once(&self, id: &str) -> Result<TaskRecord, AppError> {
        let path = self.layout.record_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AppError::TaskNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|source| AppError::CorruptRecord {
            id: id.to_string(),
            source,
        })
    }

    async fn read_with_retry(&self, id: &str) -> Result<TaskRecord, AppError> {
        self.retry
            .run(|| self.read_once(id), AppError::is_transient)
            .await
    }

    /// Write to a sibling temp file, then rename over the record
    async fn write(&self, record: &TaskRecord) -> Result<(), AppError> {
        let path = self.layout.record_path(&record.id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(record)?;
        let tmp = temp_path(&path);
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    name.into()
}

fn check_id(id: &str) -> Result<(), AppError> {
    if is_valid_task_id(id) {
        Ok(())
    } else {
        Err(AppError::InvalidTaskId(id.to_string()))
    }
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn create(&self, task: NewTask) -> Result<TaskRecord, AppError> {
        check_id(&task.id)?;
        let _turn = self.lanes.acquire(&task.id).await;

        if tokio::fs::try_exists(self.layout.record_path(&task.id)).await? {
            return Err(AppError::TaskExists(task.id));
        }
        let record = TaskRecord::new(task, Utc::now());
        self.write(&record).await?;
        info!("Created task {} ({})", record.id, record.original_name);
        Ok(record)
    }

    async fn read(&self, id: &str) -> Result<TaskRecord, AppError> {
        check_id(id)?;
        self.read_with_retry(id).await
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<TaskRecord, AppError> {
        check_id(id)?;
        let _turn = self.lanes.acquire(id).await;

        let mut record = self.read_with_retry(id).await?;
        record.apply(&patch, Utc::now())?;
        self.write(&record).await?;
        if patch.is_terminal() {
            debug!("Task {} reached {}", id, record.status);
        }
        Ok(record)
    }

    async fn list_ids(&self) -> Result<Vec<String>, AppError> {
        let mut entries = match tokio::fs::read_dir(self.layout.records_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(StorageLayout::task_id_from_record) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        check_id(id)?;
        let _turn = self.lanes.acquire(id).await;

        match tokio::fs::remove_file(self.layout.record_path(id)).await {
            Ok(()) => {
                debug!("Deleted record {}", id);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => {
                warn!("Failed to delete record {}: {}", id, e);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ErrorCategory, TaskStatus};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn store() -> (TempDir, JsonTaskStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTaskStore::with_retry(
            StorageLayout::under(dir.path()),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );
        (dir, store)
    }

    fn new_task(id: &str) -> NewTask {
        NewTask {
            id: id.to_string(),
            original_name: "holiday.mkv".to_string(),
            upload_filename: format!("{}.mkv", id),
            ..NewTask::default()
        }
    }

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let (_dir, store) = store();
        let created = store.create(new_task("a1")).await.unwrap();
        let read = store.read("a1").await.unwrap();
        assert_eq!(created, read);
        assert_eq!(read.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let (_dir, store) = store();
        store.create(new_task("a1")).await.unwrap();
        let err = store.create(new_task("a1")).await.unwrap_err();
        assert!(matches!(err, AppError::TaskExists(_)));
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let (_dir, store) = store();
        let err = store.read("nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.update("nope", TaskPatch::progress(1)).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn rejects_path_like_ids() {
        let (_dir, store) = store();
        let err = store.read("../secret").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTaskId(_)));
    }

    #[tokio::test]
    async fn corrupt_record_fails_after_retries() {
        let (dir, store) = store();
        store.create(new_task("a1")).await.unwrap();
        std::fs::write(dir.path().join("tasks").join("a1.json"), b"{\"id\": ").unwrap();
        let err = store.read("a1").await.unwrap_err();
        assert!(matches!(err, AppError::CorruptRecord { .. }));
    }

    #[tokio::test]
    async fn half_written_record_is_retried() {
        let (dir, store) = store();
        let record = store.create(new_task("a1")).await.unwrap();
        let path = dir.path().join("tasks").join("a1.json");
        std::fs::write(&path, b"{").unwrap();

        let store = JsonTaskStore::with_retry(
            StorageLayout::under(dir.path()),
            RetryPolicy::new(10, Duration::from_millis(20)),
        );
        let fixer = {
            let path = path.clone();
            let json = serde_json::to_vec(&record).unwrap();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                std::fs::write(path, json).unwrap();
            })
        };
        let read = store.read("a1").await.unwrap();
        fixer.await.unwrap();
        assert_eq!(read.id, "a1");
    }

    #[tokio::test]
    async fn concurrent_progress_updates_are_not_lost() {
        let (_dir, store) = store();
        let store = Arc::new(store);
        store.create(new_task("race")).await.unwrap();
        store.update("race", TaskPatch::processing(0)).await.unwrap();

        let mut handles = Vec::new();
        for pct in [35u8, 80, 10, 55, 20, 70] {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.update("race", TaskPatch::progress(pct)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let record = store.read("race").await.unwrap();
        assert_eq!(record.status, TaskStatus::Processing);
        assert_eq!(record.progress_percent, 80);
        assert!(record.expires_at.is_none());
        assert_eq!(store.active_lanes(), 0);
    }

    #[tokio::test]
    async fn failure_racing_progress_keeps_every_error_field() {
        let (_dir, store) = store();
        let store = Arc::new(store);
        store.create(new_task("race")).await.unwrap();
        store.update("race", TaskPatch::processing(0)).await.unwrap();

        let mut handles = Vec::new();
        for pct in [10u8, 30, 50, 70] {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                // Progress after the failure lands is rejected
                let _ = store.update("race", TaskPatch::progress(pct)).await;
            }));
        }
        let failer = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .update(
                        "race",
                        TaskPatch::failed(ErrorCategory::DiskFull, "disk full".into(), Utc::now()),
                    )
                    .await
                    .unwrap();
            })
        };
        for h in handles {
            h.await.unwrap();
        }
        failer.await.unwrap();

        let record = store.read("race").await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error_category, Some(ErrorCategory::DiskFull));
        assert_eq!(record.error_message.as_deref(), Some("disk full"));
        assert!(record.expires_at.is_some());
        assert!(record.output_location.is_none());
        assert_eq!(store.active_lanes(), 0);
    }

    #[tokio::test]
    async fn invalid_patch_leaves_stored_record_unchanged() {
        let (_dir, store) = store();
        store.create(new_task("t")).await.unwrap();
        store.update("t", TaskPatch::processing(20)).await.unwrap();
        let before = store.read("t").await.unwrap();

        let bare = TaskPatch {
            status: Some(TaskStatus::Completed),
            ..TaskPatch::default()
        };
        let err = store.update("t", bare).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidUpdate { .. }));
        assert_eq!(store.read("t").await.unwrap(), before);
    }

    #[tokio::test]
    async fn terminal_records_reject_late_progress() {
        let (_dir, store) = store();
        store.create(new_task("t")).await.unwrap();
        store.update("t", TaskPatch::processing(0)).await.unwrap();
        store
            .update("t", TaskPatch::completed("o.mp4".into(), Utc::now()))
            .await
            .unwrap();
        let late = store.update("t", TaskPatch::processing(50)).await;
        assert!(matches!(late, Err(AppError::InvalidTransition { .. })));
        assert_eq!(store.read("t").await.unwrap().progress_percent, 100);
    }

    #[tokio::test]
    async fn list_and_delete() {
        let (_dir, store) = store();
        assert!(store.list_ids().await.unwrap().is_empty());
        store.create(new_task("b")).await.unwrap();
        store.create(new_task("a")).await.unwrap();
        assert_eq!(store.list_ids().await.unwrap(), vec!["a", "b"]);

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.list_ids().await.unwrap(), vec!["b"]);
    }
}
