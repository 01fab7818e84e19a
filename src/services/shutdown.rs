//! Graceful shutdown: stop reserving, wait a bounded time for the in-flight
//! job, then force it back onto the queue if it is still running.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::job::JobEventType;
use crate::services::events::EventSink;
use crate::services::store::JobStore;
use crate::services::worker::{CurrentJob, WorkerHandle};

pub const INTERRUPTED_MESSAGE: &str = "Job interrupted by worker shutdown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// No job was in flight when the wait ended.
    Drained,
    /// The in-flight job outlived the wait and was put back on the queue.
    ForceRequeued(Uuid),
    /// The in-flight job outlived the wait and could not be requeued; the
    /// stale lock reclaimer will pick it up.
    Abandoned(Uuid),
}

pub struct ShutdownCoordinator {
    shutdown: watch::Sender<bool>,
    handle: WorkerHandle,
    store: Arc<dyn JobStore>,
    events: Arc<dyn EventSink>,
    poll_interval: Duration,
}

impl ShutdownCoordinator {
    pub(crate) fn new(
        shutdown: watch::Sender<bool>,
        handle: WorkerHandle,
        store: Arc<dyn JobStore>,
        events: Arc<dyn EventSink>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            shutdown,
            handle,
            store,
            events,
            poll_interval,
        }
    }

    /// Read-only view of the worker this coordinator controls.
    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Stop the worker from reserving new jobs and wait up to `max_wait` for
    /// the current one to finish.
    pub async fn graceful_shutdown(&self, max_wait: Duration) -> ShutdownOutcome {
        self.shutdown.send_replace(true);
        tracing::info!(max_wait_ms = max_wait.as_millis() as u64, "Graceful shutdown started");

        let deadline = Instant::now() + max_wait;
        loop {
            let Some(current) = self.handle.current_job() else {
                tracing::info!("No job in flight, shutdown can proceed");
                return ShutdownOutcome::Drained;
            };

            let now = Instant::now();
            if now >= deadline {
                return self.force_requeue(current, max_wait).await;
            }

            tracing::info!(job_id = %current.id, "Waiting for in-flight job to finish");
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn force_requeue(&self, current: CurrentJob, waited: Duration) -> ShutdownOutcome {
        let job_id = current.id;
        tracing::warn!(
            job_id = %job_id,
            waited_ms = waited.as_millis() as u64,
            "In-flight job did not finish in time, forcing it back onto the queue"
        );

        match self
            .store
            .force_requeue(job_id, current.lock_token, INTERRUPTED_MESSAGE)
            .await
        {
            Ok(false) => {
                tracing::info!(job_id = %job_id, "Job finished or changed hands before it could be requeued");
                ShutdownOutcome::Drained
            }
            Ok(true) => {
                metrics::counter!("worker_jobs_interrupted_total").increment(1);
                self.events
                    .record(
                        job_id,
                        JobEventType::JobInterrupted,
                        serde_json::json!({ "waited_ms": waited.as_millis() as u64 }),
                    )
                    .await;
                ShutdownOutcome::ForceRequeued(job_id)
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to requeue interrupted job");
                ShutdownOutcome::Abandoned(job_id)
            }
        }
    }
}

/// Shut down a worker running in `task`.
///
/// `max_wait` bounds the whole call. After a drained shutdown the loop gets
/// whatever is left of it to exit (it may have been mid-reservation when the
/// flag flipped); if it does not, whatever it picked up is force-requeued. In
/// the forced case the task is aborted.
pub async fn shutdown_worker(
    coordinator: &ShutdownCoordinator,
    mut task: JoinHandle<()>,
    max_wait: Duration,
) -> ShutdownOutcome {
    let deadline = Instant::now() + max_wait;
    let outcome = coordinator.graceful_shutdown(max_wait).await;
    if outcome != ShutdownOutcome::Drained {
        task.abort();
        return outcome;
    }

    match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(Err(e)) if e.is_panic() => {
            tracing::error!(error = %e, "Worker task panicked");
            outcome
        }
        Ok(_) => outcome,
        Err(_) => {
            let outcome = coordinator.graceful_shutdown(Duration::ZERO).await;
            task.abort();
            outcome
        }
    }
}
