//! Best-effort background release queue
//!
//! Work submitted here (session completion after a page unload, ending a
//! provider conversation) runs off the request path with a fixed deadline.
//! Failures and timeouts are logged and dropped; nothing is retried.
//!
//! `capacity` bounds both the tasks waiting in the channel and the tasks
//! running at once. Once that many are in flight, further submissions are
//! dropped.

use crate::error::Result;
use futures::future::BoxFuture;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

struct CleanupTask {
    label: String,
    work: BoxFuture<'static, Result<()>>,
}

/// Outcome counters since startup
#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanupStats {
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub dropped: u64,
}

#[derive(Clone)]
pub struct CleanupQueue {
    tx: mpsc::Sender<CleanupTask>,
    counters: Arc<Counters>,
    deadline: Duration,
}

impl CleanupQueue {
    /// Spawn the worker; must be called inside a tokio runtime
    pub fn start(capacity: usize, deadline: Duration) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let counters = Arc::new(Counters::default());
        let permits = Arc::new(Semaphore::new(capacity));
        tokio::spawn(run_worker(rx, permits, deadline, counters.clone()));
        debug!(capacity, deadline_ms = deadline.as_millis() as u64, "Cleanup queue started");
        Self {
            tx,
            counters,
            deadline,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Enqueue `work` without waiting; returns false if the queue is full
    pub fn submit<F>(&self, label: impl Into<String>, work: F) -> bool
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let task = CleanupTask {
            label: label.into(),
            work: Box::pin(work),
        };

        match self.tx.try_send(task) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!(task = %task.label, "Cleanup queue full, dropping task");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                warn!(task = %task.label, "Cleanup queue closed, dropping task");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn stats(&self) -> CleanupStats {
        CleanupStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<CleanupTask>,
    permits: Arc<Semaphore>,
    deadline: Duration,
    counters: Arc<Counters>,
) {
    while let Some(task) = rx.recv().await {
        // Waiting here leaves later tasks in the channel, so it fills up
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let counters = counters.clone();
        tokio::spawn(async move {
            run_task(task, deadline, counters).await;
            drop(permit);
        });
    }
    debug!("Cleanup queue closed");
}

async fn run_task(task: CleanupTask, deadline: Duration, counters: Arc<Counters>) {
    match tokio::time::timeout(deadline, task.work).await {
        Ok(Ok(())) => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            debug!(task = %task.label, "Cleanup task finished");
        }
        Ok(Err(e)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(task = %task.label, error = %e, "Cleanup task failed, not retrying");
        }
        Err(_) => {
            counters.timed_out.fetch_add(1, Ordering::Relaxed);
            warn!(
                task = %task.label,
                deadline_ms = deadline.as_millis() as u64,
                "Cleanup task exceeded deadline, abandoned"
            );
        }
    }
}
