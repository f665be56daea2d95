//! Task lifecycle: queued -> processing -> completed | failed
//!
//! Each scheduled task becomes one unit of work on the conversion queue. Once
//! admitted it is marked processing, converted, and moved to a terminal state.
//! Running progress travels over a watch channel to a single writer task per
//! job, which applies the throttle and is drained before the terminal write.

pub mod throttle;

pub use throttle::{ProgressThrottle, ThrottlePolicy};

use crate::cleanup::FileCleaner;
use crate::config::RetentionConfig;
use crate::encoder::{ConversionFailure, ConversionOutcome, ConversionRequest, Converter};
use crate::error::AppError;
use crate::layout::StorageLayout;
use crate::queue::ConversionQueue;
use crate::store::{ErrorCategory, TaskPatch, TaskRecord, TaskStatus, TaskStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn TaskStore>,
    queue: ConversionQueue,
    converter: Arc<dyn Converter>,
    cleaner: FileCleaner,
    layout: StorageLayout,
    retention: RetentionConfig,
    throttle: ThrottlePolicy,
}

impl TaskScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: ConversionQueue,
        converter: Arc<dyn Converter>,
        layout: StorageLayout,
        retention: RetentionConfig,
    ) -> Self {
        let cleaner = FileCleaner::new(layout.clone(), store.clone());
        Self {
            inner: Arc::new(Inner {
                store,
                queue,
                converter,
                cleaner,
                layout,
                retention,
                throttle: ThrottlePolicy::default(),
            }),
        }
    }

    pub fn queue(&self) -> &ConversionQueue {
        &self.inner.queue
    }

    /// Place task `id` on the conversion queue. The handle resolves to the
    /// status the task ended in; a queue fault resolves to `Failed`.
    pub fn schedule(&self, id: &str) -> JoinHandle<TaskStatus> {
        let id = id.to_string();
        let inner = self.inner.clone();
        let ticket = inner.queue.submit({
            let inner = inner.clone();
            let id = id.clone();
            async move { inner.run(&id).await }
        });
        debug!("Task {} queued ({:?})", id, inner.queue.status());

        tokio::spawn(async move {
            let result = match ticket {
                Ok(ticket) => ticket.wait().await,
                Err(e) => Err(e),
            };
            match result {
                Ok(status) => status,
                Err(e) => {
                    error!("Task {} lost by the conversion queue: {}", id, e);
                    inner.force_fail(&id, format!("Conversion worker fault: {}", e)).await;
                    TaskStatus::Failed
                }
            }
        })
    }

    /// Startup recovery: reschedule queued tasks and fail tasks left processing
    /// by a previous run. Returns handles for the rescheduled tasks.
    pub async fn recover(&self) -> Result<Vec<JoinHandle<TaskStatus>>, AppError> {
        let mut handles = Vec::new();
        let mut interrupted = 0;
        for id in self.inner.store.list_ids().await? {
            let record = match self.inner.store.read(&id).await {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping task {} during recovery: {}", id, e);
                    continue;
                }
            };
            match record.status {
                TaskStatus::Queued => handles.push(self.schedule(&id)),
                TaskStatus::Processing => {
                    interrupted += 1;
                    self.inner
                        .fail(
                            &id,
                            ConversionFailure::internal("Conversion interrupted by a restart"),
                        )
                        .await;
                }
                TaskStatus::Completed | TaskStatus::Failed => {}
            }
        }
        info!(
            "Recovery: {} task(s) requeued, {} interrupted task(s) failed",
            handles.len(),
            interrupted
        );
        Ok(handles)
    }
}

impl Inner {
    async fn run(&self, id: &str) -> TaskStatus {
        let record = match self.store.read(id).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                warn!("Task {} disappeared before it was admitted", id);
                return TaskStatus::Failed;
            }
            Err(e) => {
                error!("Failed to read task {}: {}", id, e);
                self.force_fail(id, format!("Task store fault: {}", e)).await;
                return TaskStatus::Failed;
            }
        };
        if record.status != TaskStatus::Queued {
            warn!("Task {} is {}, not queued; skipping", id, record.status);
            return record.status;
        }

        // The store applies queued -> processing under the task's write lane, so
        // exactly one runner wins the claim
        match self.store.update(id, TaskPatch::processing(0)).await {
            Ok(_) => {}
            Err(AppError::InvalidTransition { from, .. }) => {
                warn!("Task {} was claimed by another runner ({}); skipping", id, from);
                return from;
            }
            Err(e) => {
                error!("Failed to mark task {} processing: {}", id, e);
                self.force_fail(id, format!("Task store fault: {}", e)).await;
                return TaskStatus::Failed;
            }
        }
        info!("Task {} processing ({})", id, record.original_name);

        let (progress_tx, progress_rx) = watch::channel(0u8);
        let writer = tokio::spawn(write_progress(
            self.store.clone(),
            id.to_string(),
            progress_rx,
            self.throttle,
        ));

        let request = self.request_for(&record);
        let result = self.converter.convert(request, progress_tx).await;

        // All progress writes land before the terminal one
        if let Err(e) = writer.await {
            warn!("Progress writer for task {} ended abnormally: {}", id, e);
        }

        match result {
            Ok(outcome) => self.complete(id, outcome).await,
            Err(failure) => self.fail(id, failure).await,
        }
    }

    fn request_for(&self, record: &TaskRecord) -> ConversionRequest {
        ConversionRequest {
            task_id: record.id.clone(),
            input: self.layout.uploads_dir().join(&record.upload_filename),
            output: self.layout.output_path(&record.id),
            settings: record.encoding_settings.clone(),
        }
    }

    async fn complete(&self, id: &str, outcome: ConversionOutcome) -> TaskStatus {
        match tokio::fs::try_exists(&outcome.output).await {
            Ok(true) => {}
            Ok(false) => {
                let failure = ConversionFailure::internal(format!(
                    "Conversion reported success but {} does not exist",
                    outcome.output.display()
                ));
                return self.fail(id, failure).await;
            }
            Err(e) => {
                let failure =
                    ConversionFailure::internal(format!("Cannot verify output file: {}", e));
                return self.fail(id, failure).await;
            }
        }

        for downgrade in &outcome.downgrades {
            info!("Task {} ran with downgraded subtitles: {}", id, downgrade);
        }

        let expires_at = Utc::now() + self.retention.success();
        match self
            .store
            .update(id, TaskPatch::completed(outcome.output, expires_at))
            .await
        {
            Ok(_) => {
                info!("Task {} completed", id);
                self.cleaner
                    .schedule_upload_removal(id, self.retention.input_grace());
                TaskStatus::Completed
            }
            Err(e) => {
                error!("Failed to mark task {} completed: {}", id, e);
                self.fail(id, ConversionFailure::internal(format!("Task store fault: {}", e)))
                    .await
            }
        }
    }

    async fn fail(&self, id: &str, failure: ConversionFailure) -> TaskStatus {
        let expires_at = Utc::now() + self.retention.failure();
        let patch = TaskPatch::failed(failure.category, failure.message.clone(), expires_at);
        match self.store.update(id, patch).await {
            Ok(_) => info!("Task {} failed: {}", id, failure.message),
            Err(e) => error!("Failed to mark task {} failed: {}", id, e),
        }
        self.cleaner
            .schedule_task_cleanup(id, self.retention.failure_grace());
        TaskStatus::Failed
    }

    /// Move a task to failed from whatever non-terminal state it is in
    async fn force_fail(&self, id: &str, message: String) {
        let status = match self.store.read(id).await {
            Ok(record) => record.status,
            Err(e) => {
                error!("Cannot fail task {}: {}", id, e);
                return;
            }
        };
        if status.is_terminal() {
            return;
        }
        if status == TaskStatus::Queued
            && let Err(e) = self.store.update(id, TaskPatch::processing(0)).await
        {
            error!("Cannot fail task {}: {}", id, e);
            return;
        }
        self.fail(id, ConversionFailure::new(ErrorCategory::Internal, message, None))
            .await;
    }
}

/// Persist throttled progress until the converter drops its sender
async fn write_progress(
    store: Arc<dyn TaskStore>,
    id: String,
    mut progress: watch::Receiver<u8>,
    policy: ThrottlePolicy,
) {
    let mut throttle = ProgressThrottle::starting_at(policy, 0, Instant::now());
    while progress.changed().await.is_ok() {
        let value = *progress.borrow_and_update();
        if !throttle.offer(value, Instant::now()) {
            continue;
        }
        match store.update(&id, TaskPatch::progress(value)).await {
            Ok(_) => debug!("Task {} at {}%", id, value),
            Err(e) => warn!("Progress write for task {} failed: {}", id, e),
        }
    }
}
