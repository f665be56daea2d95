//! Collaborator-facing entry point
//!
//! Wires the store, queue, scheduler and cleanup from one `AppConfig` and
//! exposes create/read/submit for the upload handler and the CLI.

use crate::analyzer::FfprobeProbe;
use crate::cleanup::{CleanupScheduler, FileCleaner, SweepReport, Sweeper};
use crate::config::AppConfig;
use crate::encoder::{Converter, FfmpegConverter};
use crate::error::AppError;
use crate::layout::{StorageLayout, new_task_id};
use crate::queue::{ConversionQueue, QueueStatus};
use crate::scheduler::TaskScheduler;
use crate::settings::{EncodingSettings, SubtitleMode};
use crate::store::{JsonTaskStore, NewTask, TaskRecord, TaskStatus, TaskStore};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A source file staged by the caller, plus what to do with it
#[derive(Debug, Clone, Default)]
pub struct JobSubmission {
    /// Staged source; moved into the uploads root
    pub source: PathBuf,
    /// Display name supplied by the submitter
    pub original_name: String,
    pub settings: EncodingSettings,
    pub owner_token: Option<String>,
    /// Staged external subtitle file, if any
    pub subtitle: Option<PathBuf>,
}

pub struct ConversionService {
    layout: StorageLayout,
    store: Arc<JsonTaskStore>,
    scheduler: TaskScheduler,
    sweeper: Arc<Sweeper>,
    cleanup: CleanupScheduler,
}

impl ConversionService {
    /// Service running conversions through ffmpeg. Must be called inside a Tokio runtime.
    pub fn new(config: &AppConfig) -> Self {
        let probe = Arc::new(FfprobeProbe::new(config.encoding.ffprobe.clone()));
        let converter = Arc::new(FfmpegConverter::new(
            config.encoding.ffmpeg.clone(),
            config.encoding.preset.clone(),
            probe,
        ));
        Self::with_converter(config, converter)
    }

    pub fn with_converter(config: &AppConfig, converter: Arc<dyn Converter>) -> Self {
        let layout = StorageLayout::new(&config.storage);
        let store = Arc::new(JsonTaskStore::new(layout.clone()));
        let queue = ConversionQueue::new(config.encoding.concurrency);
        let scheduler = TaskScheduler::new(
            store.clone(),
            queue,
            converter,
            layout.clone(),
            config.retention.clone(),
        );
        let sweeper = Arc::new(Sweeper::new(
            store.clone(),
            FileCleaner::new(layout.clone(), store.clone()),
            config.retention.clone(),
        ));
        let cleanup = CleanupScheduler::new(config.cleanup.clone(), sweeper.clone());

        Self {
            layout,
            store,
            scheduler,
            sweeper,
            cleanup,
        }
    }

    /// Create the storage roots
    pub fn initialize(&self) -> Result<(), AppError> {
        self.layout.ensure_dirs()?;
        Ok(())
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.store.clone()
    }

    /// Stage the submitted files under a fresh id and write its queued record
    pub async fn create_job(&self, submission: JobSubmission) -> Result<TaskRecord, AppError> {
        let id = new_task_id();
        let mut settings = submission.settings;

        let upload = self.layout.upload_path(&id);
        stage_file(&submission.source, &upload).await?;

        if let Some(subtitle) = &submission.subtitle {
            let extension = subtitle
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("srt");
            let staged = self.layout.subtitle_path(&id, extension);
            if let Err(e) = stage_file(subtitle, &staged).await {
                discard(&upload).await;
                return Err(e);
            }
            if !settings.subtitle.mode.uses_external_file() {
                debug!(
                    "Task {}: external subtitle supplied, using {} instead of {}",
                    id,
                    SubtitleMode::ExternalSoft,
                    settings.subtitle.mode
                );
                settings.subtitle.mode = SubtitleMode::ExternalSoft;
            }
            settings.subtitle.external_file_path = Some(staged.to_string_lossy().into_owned());
        }

        let task = NewTask {
            upload_filename: self.layout.upload_filename(&id),
            id,
            original_name: submission.original_name,
            encoding_settings: settings,
            owner_token: submission.owner_token,
        };
        match self.store.create(task).await {
            Ok(record) => {
                info!("Created task {} for {}", record.id, record.original_name);
                Ok(record)
            }
            Err(e) => {
                discard(&upload).await;
                Err(e)
            }
        }
    }

    /// Copy caller-owned files into the uploads root for `create_job`. The
    /// originals are left in place; nothing is left staged on error.
    pub async fn stage_copies(
        &self,
        source: &Path,
        subtitle: Option<&Path>,
    ) -> Result<(PathBuf, Option<PathBuf>), AppError> {
        let staged_source = self.stage_copy(source).await?;
        let staged_subtitle = match subtitle {
            Some(path) => match self.stage_copy(path).await {
                Ok(staged) => Some(staged),
                Err(e) => {
                    discard(&staged_source).await;
                    return Err(e);
                }
            },
            None => None,
        };
        Ok((staged_source, staged_subtitle))
    }

    async fn stage_copy(&self, file: &Path) -> Result<PathBuf, AppError> {
        let extension = file
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let staged = self
            .layout
            .uploads_dir()
            .join(format!(".incoming-{}{}", uuid::Uuid::new_v4(), extension));
        if let Err(e) = tokio::fs::copy(file, &staged).await {
            warn!("Failed to stage {}: {}", file.display(), e);
            discard(&staged).await;
            return Err(e.into());
        }
        Ok(staged)
    }

    pub async fn read_job(&self, id: &str) -> Result<TaskRecord, AppError> {
        self.store.read(id).await
    }

    /// Hand a queued task to the scheduler; resolves to its final status
    pub fn submit(&self, id: &str) -> JoinHandle<TaskStatus> {
        self.scheduler.schedule(id)
    }

    /// Pick up work left behind by a previous process
    pub async fn recover(&self) -> Result<Vec<JoinHandle<TaskStatus>>, AppError> {
        self.scheduler.recover().await
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.scheduler.queue().status()
    }

    /// Start the periodic expiry sweep if this deployment enables it
    pub fn start_cleanup(&self) -> bool {
        self.cleanup.start()
    }

    pub async fn stop_cleanup(&self) {
        self.cleanup.stop().await;
    }

    /// Run one expiry sweep now
    pub async fn sweep(&self) -> SweepReport {
        self.sweeper.sweep().await
    }
}

/// Move `from` to `to`, copying when a rename is not possible
async fn stage_file(from: &Path, to: &Path) -> Result<(), AppError> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(e.into()),
        Err(e) => {
            debug!("Rename of {} failed ({}), copying", from.display(), e);
            tokio::fs::copy(from, to).await?;
            if let Err(e) = tokio::fs::remove_file(from).await {
                warn!("Staged copy left behind at {}: {}", from.display(), e);
            }
            Ok(())
        }
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != ErrorKind::NotFound
    {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}
