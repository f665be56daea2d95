use super::files::FileCleaner;
use crate::config::{CleanupConfig, MAX_INTERVAL_MINUTES, RetentionConfig};
use crate::store::{TaskRecord, TaskStatus, TaskStore};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Whether a record's files may be deleted at `now`
///
/// An explicit `expiresAt` decides. Without one, age since creation is compared
/// against the horizon for the record's status.
pub fn is_expired(record: &TaskRecord, now: DateTime<Utc>, retention: &RetentionConfig) -> bool {
    if let Some(expires_at) = record.expires_at {
        return now > expires_at;
    }
    let age = now.signed_duration_since(record.created_at);
    let horizon = match record.status {
        TaskStatus::Completed => retention.success(),
        TaskStatus::Failed => retention.failure(),
        TaskStatus::Queued | TaskStatus::Processing => retention.orphan(),
    };
    age > horizon
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    pub cleaned: usize,
    pub errors: usize,
}

pub struct Sweeper {
    store: Arc<dyn TaskStore>,
    cleaner: FileCleaner,
    retention: RetentionConfig,
}

impl Sweeper {
    pub fn new(store: Arc<dyn TaskStore>, cleaner: FileCleaner, retention: RetentionConfig) -> Self {
        Self {
            store,
            cleaner,
            retention,
        }
    }

    /// Delete the artifacts of every expired task as of now
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let ids = match self.store.list_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Cleanup sweep could not list tasks: {}", e);
                report.errors += 1;
                return report;
            }
        };

        for id in ids {
            report.scanned += 1;
            let record = match self.store.read(&id).await {
                Ok(record) => record,
                // Removed by a concurrent cleanup
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    warn!("Skipping task {} during sweep: {}", id, e);
                    report.errors += 1;
                    continue;
                }
            };

            if !is_expired(&record, now, &self.retention) {
                continue;
            }
            report.expired += 1;
            debug!("Task {} ({}) expired", id, record.status);

            match self.cleaner.cleanup_task(&id).await {
                Ok(_) => report.cleaned += 1,
                Err(e) => {
                    warn!("Failed to clean up expired task {}: {}", id, e);
                    report.errors += 1;
                }
            }
        }

        info!(
            "Cleanup sweep: {} scanned, {} expired, {} cleaned, {} error(s)",
            report.scanned, report.expired, report.cleaned, report.errors
        );
        report
    }
}

struct Running {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Runs the sweeper on a fixed interval while started
pub struct CleanupScheduler {
    config: CleanupConfig,
    sweeper: Arc<Sweeper>,
    running: Mutex<Option<Running>>,
}

impl CleanupScheduler {
    pub fn new(config: CleanupConfig, sweeper: Arc<Sweeper>) -> Self {
        Self {
            config,
            sweeper,
            running: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Start periodic sweeps; the first one runs immediately.
    /// Returns false when disabled or already running.
    pub fn start(&self) -> bool {
        if !self.config.enabled {
            info!("Cleanup scheduler is disabled");
            return false;
        }
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let sweeper = self.sweeper.clone();
        let period = self.config.interval().clamp(
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(MAX_INTERVAL_MINUTES * 60),
        );
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        sweeper.sweep().await;
                    }
                }
            }
            debug!("Cleanup scheduler loop exited");
        });

        info!(
            "Cleanup scheduler started (every {} minute(s))",
            self.config.interval_minutes
        );
        *running = Some(Running {
            stop: stop_tx,
            handle,
        });
        true
    }

    /// Stop after any in-flight sweep finishes
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(Running { stop, handle }) = running {
            let _ = stop.send(());
            if let Err(e) = handle.await {
                warn!("Cleanup scheduler ended abnormally: {}", e);
            }
            info!("Cleanup scheduler stopped");
        }
    }
}
