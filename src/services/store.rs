//! Datastore contract for the shared job table.
//!
//! All claims go through [`JobStore::try_claim`], a conditional update that
//! only succeeds while the row is still queued, due and unlocked. Writes made
//! by the lock holder are scoped by `(id, lock_token)` and report whether they
//! touched a row, so a worker that lost its lock cannot clobber the new owner.

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{FailureOutcome, JobRecord, JobType, NewJob};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Undecodable job row: {0}")]
    Decode(String),

    #[error("Row {0} not found")]
    NotFound(Uuid),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `queued` job with zero attempts and no lock.
    async fn enqueue(&self, job: NewJob) -> Result<JobRecord, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError>;

    /// Due, unlocked, queued jobs of the given types, ordered by
    /// `(priority ASC, created_at ASC)`.
    async fn find_candidates(
        &self,
        job_types: &[JobType],
        limit: usize,
    ) -> Result<Vec<JobRecord>, StoreError>;

    /// Atomically claim a job: set the lock, move it to `running` and bump
    /// `attempts`, but only if it is still claimable. `None` means another
    /// worker got there first.
    async fn try_claim(&self, id: Uuid, lock_token: Uuid) -> Result<Option<JobRecord>, StoreError>;

    /// Mark a claimed job `succeeded` and clear its lock and error.
    async fn mark_succeeded(&self, id: Uuid, lock_token: Uuid) -> Result<bool, StoreError>;

    /// Write the retry policy's verdict for a failed attempt. Either outcome
    /// clears the lock in the same write, so a row never sits `queued` while
    /// still holding a lock.
    async fn record_failure(
        &self,
        id: Uuid,
        lock_token: Uuid,
        outcome: &FailureOutcome,
    ) -> Result<bool, StoreError>;

    /// Drop the lock held under `lock_token`. A row still `running` at this
    /// point goes back to `queued`.
    async fn release_lock(&self, id: Uuid, lock_token: Uuid) -> Result<bool, StoreError>;

    /// Requeue a running job still held under `lock_token`, ahead of the
    /// holder finishing it. A job that was reclaimed and claimed by another
    /// worker in the meantime is left alone.
    async fn force_requeue(&self, id: Uuid, lock_token: Uuid, reason: &str) -> Result<bool, StoreError>;

    /// Requeue every running job of `job_type` locked for longer than
    /// `lock_timeout`. Returns the reclaimed ids.
    async fn reclaim_stale(
        &self,
        job_type: JobType,
        lock_timeout: Duration,
        reason: &str,
    ) -> Result<Vec<Uuid>, StoreError>;

    async fn update_progress(
        &self,
        id: Uuid,
        lock_token: Uuid,
        completed: i32,
        total: i32,
    ) -> Result<bool, StoreError>;

    /// Connectivity check for health reporting.
    async fn ping(&self) -> Result<(), StoreError>;
}
