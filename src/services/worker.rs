//! The worker loop: reserve a job, run its processor, write the outcome back,
//! release the lock, repeat until shutdown.

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::Instrument;
use uuid::Uuid;

use crate::models::job::{FailureOutcome, JobEventType, JobRecord, JobType};
use crate::services::events::EventSink;
use crate::services::processor::{ProcessSummary, ProcessorError, ProcessorRegistry, ProgressReporter};
use crate::services::reaper::StaleLockReclaimer;
use crate::services::reservation::{JobReserver, DEFAULT_CANDIDATE_LIMIT};
use crate::services::retry::RetryPolicy;
use crate::services::shutdown::ShutdownCoordinator;
use crate::services::store::{JobStore, StoreError};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Sleep after an empty or failed reservation.
    pub poll_interval: Duration,
    pub candidate_limit: usize,
    pub stale_lock_timeout: Duration,
    /// How often the loop runs the stale lock reclaimer.
    pub stale_lock_check_interval: Duration,
    pub retry: RetryPolicy,
    /// How often graceful shutdown checks whether the in-flight job finished.
    pub shutdown_poll_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
            stale_lock_timeout: Duration::from_secs(10 * 60),
            stale_lock_check_interval: Duration::from_secs(5 * 60),
            retry: RetryPolicy::default(),
            shutdown_poll_interval: Duration::from_secs(1),
        }
    }
}

/// The job a worker is currently processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CurrentJob {
    pub id: Uuid,
    pub job_type: JobType,
    /// Token of this worker's claim. Shutdown requeues only under it.
    #[serde(skip)]
    pub lock_token: Uuid,
}

/// Point-in-time view of a worker, for health reporting and shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerState {
    pub current_job_id: Option<Uuid>,
    pub current_job_type: Option<JobType>,
    pub shutting_down: bool,
}

/// Read-only access to a worker's state from other tasks.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    current: watch::Receiver<Option<CurrentJob>>,
    shutdown: watch::Receiver<bool>,
    started_at: Instant,
}

impl WorkerHandle {
    pub fn current_job(&self) -> Option<CurrentJob> {
        *self.current.borrow()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn state(&self) -> WorkerState {
        let current = self.current_job();
        WorkerState {
            current_job_id: current.map(|job| job.id),
            current_job_type: current.map(|job| job.job_type),
            shutting_down: self.is_shutting_down(),
        }
    }
}

pub struct Worker {
    store: Arc<dyn JobStore>,
    events: Arc<dyn EventSink>,
    processors: ProcessorRegistry,
    capabilities: Vec<JobType>,
    reserver: JobReserver,
    reclaimer: StaleLockReclaimer,
    settings: WorkerSettings,
    current: watch::Sender<Option<CurrentJob>>,
    shutdown: watch::Receiver<bool>,
    last_reclaim: Option<Instant>,
}

impl Worker {
    /// Build a worker and the coordinator that shuts it down.
    ///
    /// The worker handles exactly the job types registered in `processors`.
    pub fn new(
        store: Arc<dyn JobStore>,
        events: Arc<dyn EventSink>,
        processors: ProcessorRegistry,
        settings: WorkerSettings,
    ) -> (Self, ShutdownCoordinator) {
        let (current_tx, current_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = WorkerHandle {
            current: current_rx,
            shutdown: shutdown_rx.clone(),
            started_at: Instant::now(),
        };
        let coordinator = ShutdownCoordinator::new(
            shutdown_tx,
            handle,
            store.clone(),
            events.clone(),
            settings.shutdown_poll_interval,
        );

        let worker = Self {
            reserver: JobReserver::new(store.clone(), events.clone(), settings.candidate_limit),
            reclaimer: StaleLockReclaimer::new(store.clone(), events.clone()),
            capabilities: processors.job_types(),
            store,
            events,
            processors,
            settings,
            current: current_tx,
            shutdown: shutdown_rx,
            last_reclaim: None,
        };

        (worker, coordinator)
    }

    pub fn capabilities(&self) -> &[JobType] {
        &self.capabilities
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Process jobs until shutdown is requested. Errors never end the loop.
    pub async fn run(mut self) {
        tracing::info!(job_types = ?self.capabilities, "Worker loop started");

        while !self.is_shutting_down() {
            match self.run_once().await {
                Ok(Some(job_id)) => {
                    tracing::debug!(job_id = %job_id, "Job handled, checking for next job");
                }
                Ok(None) => {
                    tracing::trace!("No jobs available, sleeping");
                    self.idle().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to reserve job, will retry");
                    self.idle().await;
                }
            }
        }

        tracing::info!("Worker loop stopped");
    }

    /// One iteration: maybe reclaim stale locks, then reserve and handle at
    /// most one job. Returns the id of the handled job.
    pub async fn run_once(&mut self) -> Result<Option<Uuid>, StoreError> {
        self.reclaim_if_due().await;

        if self.is_shutting_down() {
            return Ok(None);
        }

        let Some(job) = self.reserver.reserve_next_job(&self.capabilities).await? else {
            return Ok(None);
        };

        let job_id = job.id;
        let span = tracing::info_span!("job", job.id = %job.id, job.type = %job.job_type, attempt = job.attempts);
        self.execute(job).instrument(span).await;
        Ok(Some(job_id))
    }

    async fn idle(&self) {
        let mut shutdown = self.shutdown.clone();
        let shutdown_requested = async move {
            let closed = shutdown.wait_for(|flag| *flag).await.is_err();
            if closed {
                std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(self.settings.poll_interval) => {}
            _ = shutdown_requested => {}
        }
    }

    async fn reclaim_if_due(&mut self) {
        let due = self
            .last_reclaim
            .map_or(true, |at| at.elapsed() >= self.settings.stale_lock_check_interval);
        if !due {
            return;
        }
        self.last_reclaim = Some(Instant::now());

        for job_type in &self.capabilities {
            let count = self
                .reclaimer
                .reclaim_stale_locks(*job_type, self.settings.stale_lock_timeout)
                .await;
            if count > 0 {
                tracing::info!(job_type = %job_type, count, "Stale locks reclaimed");
            }
        }
    }

    async fn execute(&self, job: JobRecord) {
        let Some(lock_token) = job.lock_token else {
            tracing::error!(job_id = %job.id, "Reserved job carries no lock token, skipping");
            return;
        };

        self.current.send_replace(Some(CurrentJob {
            id: job.id,
            job_type: job.job_type,
            lock_token,
        }));
        tracing::info!("Processing job");

        let started = Instant::now();
        let result = self.dispatch(&job, lock_token).await;
        let elapsed = started.elapsed();
        metrics::histogram!("worker_job_duration_seconds", "job_type" => job.job_type.to_string())
            .record(elapsed.as_secs_f64());

        match result {
            Ok(summary) => self.complete(&job, lock_token, summary, elapsed).await,
            Err(e) => self.fail(&job, lock_token, &e).await,
        }

        // Runs on every path. Normally a no-op because the outcome write
        // already cleared the lock.
        match self.store.release_lock(job.id, lock_token).await {
            Ok(true) => tracing::warn!("Outcome was not recorded, lock released and job requeued"),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Failed to release job lock, stale lock reclaim will recover it")
            }
        }

        self.current.send_replace(None);
    }

    async fn dispatch(&self, job: &JobRecord, lock_token: Uuid) -> Result<ProcessSummary, ProcessorError> {
        let (processor, timeout) = self
            .processors
            .get(job.job_type)
            .ok_or(ProcessorError::NoProcessor(job.job_type))?;
        let progress = ProgressReporter::new(self.store.clone(), self.events.clone(), job.id, lock_token);

        let run = AssertUnwindSafe(processor.process(job, &progress)).catch_unwind();
        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(ProcessorError::Panicked(panic_message(&*panic))),
            Err(_) => Err(ProcessorError::TimedOut(timeout.as_millis() as u64)),
        }
    }

    async fn complete(&self, job: &JobRecord, lock_token: Uuid, summary: ProcessSummary, elapsed: Duration) {
        match self.store.mark_succeeded(job.id, lock_token).await {
            Ok(true) => {
                tracing::info!(
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    duration_ms = elapsed.as_millis() as u64,
                    "Job completed successfully"
                );
                metrics::counter!("worker_jobs_succeeded_total", "job_type" => job.job_type.to_string())
                    .increment(1);
                self.events
                    .record(
                        job.id,
                        JobEventType::JobSucceeded,
                        serde_json::json!({
                            "succeeded": summary.succeeded,
                            "failed": summary.failed,
                            "duration_ms": elapsed.as_millis() as u64,
                        }),
                    )
                    .await;
            }
            Ok(false) => {
                tracing::warn!("Lock lost before completion, result not recorded");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to mark job succeeded");
            }
        }
    }

    async fn fail(&self, job: &JobRecord, lock_token: Uuid, error: &ProcessorError) {
        tracing::error!(error = %error, "Job processing failed");

        let outcome = self.settings.retry.decide(job, &error.to_string(), Utc::now());
        match self.store.record_failure(job.id, lock_token, &outcome).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("Lock lost before failure could be recorded");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to record job failure");
                return;
            }
        }

        let job_type = job.job_type.to_string();
        match &outcome {
            FailureOutcome::Requeue { run_at, last_error } => {
                tracing::info!(attempts = job.attempts, run_at = %run_at, "Job re-queued for retry");
                metrics::counter!("worker_jobs_retried_total", "job_type" => job_type).increment(1);
                self.events
                    .record(
                        job.id,
                        JobEventType::JobRetryScheduled,
                        serde_json::json!({
                            "attempts": job.attempts,
                            "run_at": run_at,
                            "error": last_error,
                        }),
                    )
                    .await;
            }
            FailureOutcome::Fail { last_error } => {
                tracing::warn!(attempts = job.attempts, "Job failed after max attempts");
                metrics::counter!("worker_jobs_failed_total", "job_type" => job_type).increment(1);
                self.events
                    .record(
                        job.id,
                        JobEventType::JobFailed,
                        serde_json::json!({
                            "attempts": job.attempts,
                            "error": last_error,
                        }),
                    )
                    .await;
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
