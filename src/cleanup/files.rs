use crate::error::AppError;
use crate::layout::StorageLayout;
use crate::store::TaskStore;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// What a cleanup pass actually removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub files_removed: usize,
    pub record_removed: bool,
}

/// Deletes the files belonging to a task. Every operation tolerates files that are already gone.
#[derive(Clone)]
pub struct FileCleaner {
    layout: StorageLayout,
    store: Arc<dyn TaskStore>,
}

impl FileCleaner {
    pub fn new(layout: StorageLayout, store: Arc<dyn TaskStore>) -> Self {
        Self { layout, store }
    }

    /// Staged uploads of task `id` (input plus any external subtitle)
    pub async fn uploads_of(&self, id: &str) -> Vec<PathBuf> {
        let layout = self.layout.clone();
        let id = id.to_string();
        let found = tokio::task::spawn_blocking(move || {
            WalkDir::new(layout.uploads_dir())
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| {
                    e.file_name()
                        .to_str()
                        .is_some_and(|name| layout.is_upload_of(&id, name))
                })
                .map(|e| e.into_path())
                .collect::<Vec<_>>()
        })
        .await;

        found.unwrap_or_else(|e| {
            warn!("Upload scan failed: {}", e);
            Vec::new()
        })
    }

    /// Remove the staged uploads of a completed task
    pub async fn remove_uploads(&self, id: &str) -> Result<usize, AppError> {
        let mut removed = 0;
        for path in self.uploads_of(id).await {
            if remove_if_exists(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove every artifact of task `id`: uploads, output and record
    pub async fn cleanup_task(&self, id: &str) -> Result<CleanupReport, AppError> {
        let mut report = CleanupReport {
            files_removed: self.remove_uploads(id).await?,
            ..CleanupReport::default()
        };
        if remove_if_exists(&self.layout.output_path(id)).await? {
            report.files_removed += 1;
        }
        report.record_removed = self.store.delete(id).await?;

        if report.files_removed > 0 || report.record_removed {
            info!(
                "Cleaned up task {}: {} file(s), record {}",
                id,
                report.files_removed,
                if report.record_removed { "removed" } else { "already gone" }
            );
        } else {
            debug!("Nothing left to clean for task {}", id);
        }
        Ok(report)
    }

    /// Remove the uploads of `id` after `delay`
    pub fn schedule_upload_removal(&self, id: &str, delay: Duration) -> JoinHandle<()> {
        let cleaner = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match cleaner.remove_uploads(&id).await {
                Ok(n) => debug!("Removed {} upload(s) of task {}", n, id),
                Err(e) => warn!("Failed to remove uploads of task {}: {}", id, e),
            }
        })
    }

    /// Remove all artifacts of `id` after `delay`
    pub fn schedule_task_cleanup(&self, id: &str, delay: Duration) -> JoinHandle<()> {
        let cleaner = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = cleaner.cleanup_task(&id).await {
                warn!("Delayed cleanup of task {} failed: {}", id, e);
            }
        })
    }
}

/// Delete a file; a missing file is not an error. Returns whether something was deleted.
pub async fn remove_if_exists(path: &Path) -> Result<bool, AppError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JsonTaskStore, NewTask};
    use tempfile::TempDir;

    fn setup() -> (TempDir, StorageLayout, Arc<JsonTaskStore>, FileCleaner) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::under(dir.path());
        layout.ensure_dirs().unwrap();
        let store = Arc::new(JsonTaskStore::new(layout.clone()));
        let cleaner = FileCleaner::new(layout.clone(), store.clone());
        (dir, layout, store, cleaner)
    }

    async fn stage(layout: &StorageLayout, store: &JsonTaskStore, id: &str) {
        store
            .create(NewTask {
                id: id.to_string(),
                original_name: "clip.mkv".to_string(),
                upload_filename: layout.upload_filename(id),
                ..NewTask::default()
            })
            .await
            .unwrap();
        std::fs::write(layout.upload_path(id), b"input").unwrap();
        std::fs::write(layout.subtitle_path(id, "srt"), b"subs").unwrap();
        std::fs::write(layout.output_path(id), b"output").unwrap();
    }

    #[tokio::test]
    async fn removes_everything_for_one_task_only() {
        let (_dir, layout, store, cleaner) = setup();
        stage(&layout, &store, "a").await;
        stage(&layout, &store, "b").await;

        let report = cleaner.cleanup_task("a").await.unwrap();
        assert_eq!(
            report,
            CleanupReport {
                files_removed: 3,
                record_removed: true
            }
        );
        assert!(!layout.upload_path("a").exists());
        assert!(!layout.output_path("a").exists());
        assert!(layout.upload_path("b").exists());
        assert!(layout.output_path("b").exists());
        assert!(store.read("b").await.is_ok());
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let (_dir, layout, store, cleaner) = setup();
        stage(&layout, &store, "a").await;
        cleaner.cleanup_task("a").await.unwrap();

        let again = cleaner.cleanup_task("a").await.unwrap();
        assert_eq!(again, CleanupReport::default());
        let never = cleaner.cleanup_task("never-existed").await.unwrap();
        assert_eq!(never, CleanupReport::default());
    }

    #[tokio::test]
    async fn missing_roots_are_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::under(dir.path().join("absent"));
        let store = Arc::new(JsonTaskStore::new(layout.clone()));
        let cleaner = FileCleaner::new(layout, store);
        assert_eq!(cleaner.cleanup_task("x").await.unwrap(), CleanupReport::default());
    }

    #[tokio::test]
    async fn upload_removal_keeps_output_and_record() {
        let (_dir, layout, store, cleaner) = setup();
        stage(&layout, &store, "a").await;
        cleaner
            .schedule_upload_removal("a", Duration::ZERO)
            .await
            .unwrap();
        assert!(!layout.upload_path("a").exists());
        assert!(!layout.subtitle_path("a", "srt").exists());
        assert!(layout.output_path("a").exists());
        assert!(store.read("a").await.is_ok());
    }
}
