//! Type-specific job processors and the registry the worker dispatches through.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{JobEventType, JobRecord, JobType};
use crate::models::payload::PayloadError;
use crate::services::events::EventSink;
use crate::services::store::{JobStore, StoreError};

/// Item counts reported by a processor that finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ProcessSummary {
    pub succeeded: u32,
    pub failed: u32,
}

/// Failure talking to an external collaborator (FWC search, extraction API).
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Failed to parse collaborator response: {0}")]
    Parse(String),
}

/// Why a processor did not finish. The `Display` text is stored as the
/// job's `last_error`.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("Failed to store results: {0}")]
    Store(#[from] StoreError),

    #[error("All {attempted} items failed; last error: {last_error}")]
    AllFailed { attempted: u32, last_error: String },

    #[error("Processing timed out after {0} ms")]
    TimedOut(u64),

    #[error("Processor panicked: {0}")]
    Panicked(String),

    #[error("No processor registered for job type {0}")]
    NoProcessor(JobType),
}

#[async_trait]
pub trait Processor: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn process(
        &self,
        job: &JobRecord,
        progress: &ProgressReporter,
    ) -> Result<ProcessSummary, ProcessorError>;
}

/// Writes progress counters for the job currently held by the worker.
///
/// Best-effort: a failed write is logged and processing continues.
pub struct ProgressReporter {
    store: Arc<dyn JobStore>,
    events: Arc<dyn EventSink>,
    job_id: Uuid,
    lock_token: Uuid,
}

impl ProgressReporter {
    pub fn new(
        store: Arc<dyn JobStore>,
        events: Arc<dyn EventSink>,
        job_id: Uuid,
        lock_token: Uuid,
    ) -> Self {
        Self {
            store,
            events,
            job_id,
            lock_token,
        }
    }

    pub async fn report(&self, completed: u32, total: u32) {
        let completed = i32::try_from(completed).unwrap_or(i32::MAX);
        let total = i32::try_from(total).unwrap_or(i32::MAX);

        match self
            .store
            .update_progress(self.job_id, self.lock_token, completed, total)
            .await
        {
            Ok(true) => {
                self.events
                    .record(
                        self.job_id,
                        JobEventType::JobProgress,
                        serde_json::json!({ "completed": completed, "total": total }),
                    )
                    .await;
            }
            Ok(false) => {
                tracing::warn!(job_id = %self.job_id, "Progress not recorded, lock no longer held");
            }
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "Failed to record progress");
            }
        }
    }
}

#[derive(Clone)]
struct Registered {
    processor: Arc<dyn Processor>,
    timeout: Duration,
}

/// Maps each job type to its processor and processing timeout. The
/// registered types are the worker's capabilities.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    entries: BTreeMap<JobType, Registered>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: Processor + 'static>(self, processor: P, timeout: Duration) -> Self {
        self.register_arc(Arc::new(processor), timeout)
    }

    pub fn register_arc(mut self, processor: Arc<dyn Processor>, timeout: Duration) -> Self {
        self.entries
            .insert(processor.job_type(), Registered { processor, timeout });
        self
    }

    pub fn job_types(&self) -> Vec<JobType> {
        self.entries.keys().copied().collect()
    }

    pub fn get(&self, job_type: JobType) -> Option<(Arc<dyn Processor>, Duration)> {
        self.entries
            .get(&job_type)
            .map(|entry| (entry.processor.clone(), entry.timeout))
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(job_type, entry)| (job_type, entry.timeout)))
            .finish()
    }
}
