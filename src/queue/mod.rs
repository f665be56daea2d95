//! Process-wide admission gate for ffmpeg runs
//!
//! Submitted work goes through a single dispatcher that hands out permits in
//! submission order, so admission is FIFO. Completion order is not.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tracing::{debug, error};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The dispatcher is gone; nothing new can be admitted
    #[error("Conversion queue is closed")]
    Closed,
    /// The job ended without producing a result (panicked)
    #[error("Queued job was aborted")]
    Aborted,
}

/// Snapshot of queue occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub waiting: usize,
    pub running: usize,
    pub limit: usize,
}

type Admission = Box<dyn FnOnce(OwnedSemaphorePermit) + Send>;

#[derive(Debug, Default)]
struct Counters {
    waiting: AtomicUsize,
    running: AtomicUsize,
}

#[derive(Clone)]
pub struct ConversionQueue {
    sender: mpsc::UnboundedSender<Admission>,
    counters: Arc<Counters>,
    limit: usize,
}

/// Handle to a submitted job's result
#[derive(Debug)]
pub struct Ticket<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> Ticket<T> {
    /// Wait for the job to be admitted and finish
    pub async fn wait(self) -> Result<T, QueueError> {
        self.receiver.await.map_err(|_| QueueError::Aborted)
    }
}

/// Keeps the running count accurate even if the job panics
struct RunningSlot {
    counters: Arc<Counters>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for RunningSlot {
    fn drop(&mut self) {
        self.counters.running.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConversionQueue {
    /// Create the queue and start its dispatcher. Must be called inside a Tokio runtime.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let semaphore = Arc::new(Semaphore::new(limit));
        tokio::spawn(dispatch(receiver, semaphore, counters.clone()));
        debug!("Conversion queue started with limit {}", limit);
        Self {
            sender,
            counters,
            limit,
        }
    }

    /// Queue `job`; it starts once a slot is free and every earlier job has been admitted
    pub fn submit<F, T>(&self, job: F) -> Result<Ticket<T>, QueueError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let counters = self.counters.clone();
        let admission: Admission = Box::new(move |permit| {
            counters.running.fetch_add(1, Ordering::SeqCst);
            let slot = RunningSlot {
                counters,
                _permit: permit,
            };
            tokio::spawn(async move {
                let output = job.await;
                drop(slot);
                let _ = tx.send(output);
            });
        });

        self.counters.waiting.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(admission).is_err() {
            self.counters.waiting.fetch_sub(1, Ordering::SeqCst);
            error!("Conversion queue dispatcher has stopped");
            return Err(QueueError::Closed);
        }
        Ok(Ticket { receiver: rx })
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            waiting: self.counters.waiting.load(Ordering::SeqCst),
            running: self.counters.running.load(Ordering::SeqCst),
            limit: self.limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

async fn dispatch(
    mut receiver: mpsc::UnboundedReceiver<Admission>,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
) {
    while let Some(admission) = receiver.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        counters.waiting.fetch_sub(1, Ordering::SeqCst);
        admission(permit);
    }
    debug!("Conversion queue dispatcher stopped");
}
