//! In-process implementations of the datastore seams.
//!
//! Every conditional update is evaluated under one mutex, which gives the same
//! claim semantics as the Postgres `UPDATE ... WHERE lock_token IS NULL`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{
    FailureOutcome, JobEvent, JobEventType, JobRecord, JobStatus, JobType, NewJob,
};
use crate::models::results::{ExtractionResult, FwcSearchResult};
use crate::services::events::EventSink;
use crate::services::results::ResultStore;
use crate::services::store::{JobStore, StoreError};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a row as-is.
    pub fn insert(&self, job: JobRecord) {
        guard(&self.jobs).insert(job.id, job);
    }

    pub fn snapshot(&self, id: Uuid) -> Option<JobRecord> {
        guard(&self.jobs).get(&id).cloned()
    }

    /// Pull a scheduled job's `run_at` back to now.
    pub fn make_due(&self, id: Uuid) {
        if let Some(job) = guard(&self.jobs).get_mut(&id) {
            job.run_at = Utc::now();
        }
    }

    /// Move a job's `locked_at` into the past, as if its worker had stalled.
    pub fn age_lock(&self, id: Uuid, by: Duration) {
        if let Some(job) = guard(&self.jobs).get_mut(&id) {
            if let Some(locked_at) = job.locked_at {
                job.locked_at = Some(locked_at - to_chrono(by));
            }
        }
    }

    fn update_held<F>(&self, id: Uuid, lock_token: Uuid, apply: F) -> bool
    where
        F: FnOnce(&mut JobRecord, DateTime<Utc>),
    {
        let mut jobs = guard(&self.jobs);
        match jobs.get_mut(&id) {
            Some(job) if job.lock_token == Some(lock_token) => {
                let now = Utc::now();
                apply(job, now);
                job.updated_at = now;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        let now = Utc::now();
        let record = JobRecord {
            id: Uuid::new_v4(),
            job_type: job.payload.job_type(),
            status: JobStatus::Queued,
            payload: job.payload.to_value()?,
            priority: job.priority,
            run_at: job.run_at.unwrap_or(now),
            attempts: 0,
            max_attempts: job.max_attempts,
            locked_at: None,
            lock_token: None,
            last_error: None,
            progress_completed: 0,
            progress_total: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.insert(record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.snapshot(id))
    }

    async fn find_candidates(
        &self,
        job_types: &[JobType],
        limit: usize,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let now = Utc::now();
        let mut candidates: Vec<JobRecord> = guard(&self.jobs)
            .values()
            .filter(|job| job_types.contains(&job.job_type) && job.is_claimable(now))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn try_claim(&self, id: Uuid, lock_token: Uuid) -> Result<Option<JobRecord>, StoreError> {
        let mut jobs = guard(&self.jobs);
        let now = Utc::now();
        match jobs.get_mut(&id) {
            Some(job) if job.is_claimable(now) => {
                job.lock_token = Some(lock_token);
                job.status = JobStatus::Running;
                job.attempts += 1;
                job.locked_at = Some(now);
                job.last_error = None;
                job.updated_at = now;
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_succeeded(&self, id: Uuid, lock_token: Uuid) -> Result<bool, StoreError> {
        Ok(self.update_held(id, lock_token, |job, now| {
            job.status = JobStatus::Succeeded;
            job.lock_token = None;
            job.locked_at = None;
            job.last_error = None;
            job.completed_at = Some(now);
        }))
    }

    async fn record_failure(
        &self,
        id: Uuid,
        lock_token: Uuid,
        outcome: &FailureOutcome,
    ) -> Result<bool, StoreError> {
        Ok(self.update_held(id, lock_token, |job, now| {
            job.status = outcome.next_status();
            job.last_error = Some(outcome.last_error().to_string());
            job.lock_token = None;
            job.locked_at = None;
            if let FailureOutcome::Requeue { run_at, .. } = outcome {
                job.run_at = *run_at;
            }
            if job.status.is_terminal() {
                job.completed_at = Some(now);
            }
        }))
    }

    async fn release_lock(&self, id: Uuid, lock_token: Uuid) -> Result<bool, StoreError> {
        Ok(self.update_held(id, lock_token, |job, _| {
            job.lock_token = None;
            job.locked_at = None;
            if job.status == JobStatus::Running {
                job.status = JobStatus::Queued;
            }
        }))
    }

    async fn force_requeue(&self, id: Uuid, lock_token: Uuid, reason: &str) -> Result<bool, StoreError> {
        let mut jobs = guard(&self.jobs);
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running && job.lock_token == Some(lock_token) => {
                let now = Utc::now();
                job.status = JobStatus::Queued;
                job.lock_token = None;
                job.locked_at = None;
                job.last_error = Some(reason.to_string());
                job.run_at = now;
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reclaim_stale(
        &self,
        job_type: JobType,
        lock_timeout: Duration,
        reason: &str,
    ) -> Result<Vec<Uuid>, StoreError> {
        let now = Utc::now();
        let Some(cutoff) = now.checked_sub_signed(to_chrono(lock_timeout)) else {
            return Ok(Vec::new());
        };
        let mut reclaimed = Vec::new();
        for job in guard(&self.jobs).values_mut() {
            let stale = job.status == JobStatus::Running
                && job.job_type == job_type
                && job.locked_at.is_some_and(|locked_at| locked_at < cutoff);
            if stale {
                job.status = JobStatus::Queued;
                job.lock_token = None;
                job.locked_at = None;
                job.last_error = Some(reason.to_string());
                job.run_at = now;
                job.updated_at = now;
                reclaimed.push(job.id);
            }
        }
        Ok(reclaimed)
    }

    async fn update_progress(
        &self,
        id: Uuid,
        lock_token: Uuid,
        completed: i32,
        total: i32,
    ) -> Result<bool, StoreError> {
        Ok(self.update_held(id, lock_token, |job, _| {
            job.progress_completed = completed;
            job.progress_total = total;
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Keeps every recorded event in memory.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<JobEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<JobEvent> {
        guard(&self.events).clone()
    }

    pub fn types_for(&self, job_id: Uuid) -> Vec<JobEventType> {
        guard(&self.events)
            .iter()
            .filter(|event| event.job_id == job_id)
            .map(|event| event.event_type)
            .collect()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn record(&self, job_id: Uuid, event_type: JobEventType, payload: serde_json::Value) {
        guard(&self.events).push(JobEvent {
            job_id,
            event_type,
            payload,
            created_at: Utc::now(),
        });
    }
}

#[derive(Default)]
pub struct MemoryResultStore {
    fwc: Mutex<HashMap<Uuid, Vec<FwcSearchResult>>>,
    scan_rows: Mutex<HashSet<Uuid>>,
    scans: Mutex<HashMap<Uuid, ExtractionResult>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fwc_results(&self, employer_id: Uuid) -> Option<Vec<FwcSearchResult>> {
        guard(&self.fwc).get(&employer_id).cloned()
    }

    /// Create the scan row an extraction is written to.
    pub fn register_scan(&self, scan_id: Uuid) {
        guard(&self.scan_rows).insert(scan_id);
    }

    pub fn scan_extraction(&self, scan_id: Uuid) -> Option<ExtractionResult> {
        guard(&self.scans).get(&scan_id).cloned()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn save_fwc_results(
        &self,
        employer_id: Uuid,
        results: &[FwcSearchResult],
    ) -> Result<(), StoreError> {
        guard(&self.fwc).insert(employer_id, results.to_vec());
        Ok(())
    }

    async fn save_scan_extraction(
        &self,
        scan_id: Uuid,
        result: &ExtractionResult,
    ) -> Result<(), StoreError> {
        if !guard(&self.scan_rows).contains(&scan_id) {
            return Err(StoreError::NotFound(scan_id));
        }
        guard(&self.scans).insert(scan_id, result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::payload::{FwcEmployer, FwcLookupPayload, JobPayload};

    fn lookup_job() -> NewJob {
        NewJob::new(
            JobPayload::FwcLookup(FwcLookupPayload {
                employers: vec![FwcEmployer {
                    employer_id: Uuid::new_v4(),
                    employer_name: "Harbour Civil Pty Ltd".to_string(),
                    search_name: None,
                }],
                max_results: None,
            }),
            3,
        )
    }

    #[tokio::test]
    async fn test_claim_is_conditional() {
        let store = MemoryJobStore::new();
        let job = store.enqueue(lookup_job()).await.unwrap();

        let first = store.try_claim(job.id, Uuid::new_v4()).await.unwrap();
        let second = store.try_claim(job.id, Uuid::new_v4()).await.unwrap();

        let claimed = first.expect("first claim wins");
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempts, 1);
        assert!(claimed.locked_at.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_future_jobs_are_not_candidates() {
        let store = MemoryJobStore::new();
        let later = Utc::now() + chrono::Duration::minutes(5);
        let job = store.enqueue(lookup_job().run_at(later)).await.unwrap();

        let candidates = store.find_candidates(&[JobType::FwcLookup], 5).await.unwrap();
        assert!(candidates.is_empty());
        assert!(store.try_claim(job.id, Uuid::new_v4()).await.unwrap().is_none());

        store.make_due(job.id);
        let candidates = store.find_candidates(&[JobType::FwcLookup], 5).await.unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_candidates_ordered_by_priority_then_age() {
        let store = MemoryJobStore::new();
        let low = store.enqueue(lookup_job().with_priority(5)).await.unwrap();
        let high_old = store.enqueue(lookup_job().with_priority(1)).await.unwrap();
        let high_new = store.enqueue(lookup_job().with_priority(1)).await.unwrap();

        let ids: Vec<Uuid> = store
            .find_candidates(&[JobType::FwcLookup], 5)
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect();
        assert_eq!(ids, vec![high_old.id, high_new.id, low.id]);
    }

    #[tokio::test]
    async fn test_writes_require_current_lock() {
        let store = MemoryJobStore::new();
        let job = store.enqueue(lookup_job()).await.unwrap();
        let token = Uuid::new_v4();
        store.try_claim(job.id, token).await.unwrap();

        assert!(!store.mark_succeeded(job.id, Uuid::new_v4()).await.unwrap());
        assert!(store.mark_succeeded(job.id, token).await.unwrap());

        let done = store.snapshot(job.id).unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);
        assert!(done.lock_token.is_none());
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_failure_sets_completed_at() {
        let store = MemoryJobStore::new();
        let job = store.enqueue(lookup_job()).await.unwrap();
        let token = Uuid::new_v4();
        store.try_claim(job.id, token).await.unwrap();

        let fail = FailureOutcome::Fail {
            last_error: "upstream 503".to_string(),
        };
        assert!(store.record_failure(job.id, token, &fail).await.unwrap());

        let failed = store.snapshot(job.id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.status.is_terminal());
        assert!(failed.completed_at.is_some());
        assert!(failed.lock_token.is_none());
        assert_eq!(failed.last_error.as_deref(), Some("upstream 503"));
    }

    #[tokio::test]
    async fn test_force_requeue_needs_the_holders_token() {
        let store = MemoryJobStore::new();
        let job = store.enqueue(lookup_job()).await.unwrap();
        let token = Uuid::new_v4();
        store.try_claim(job.id, token).await.unwrap();

        assert!(!store
            .force_requeue(job.id, Uuid::new_v4(), "interrupted")
            .await
            .unwrap());
        assert_eq!(store.snapshot(job.id).unwrap().status, JobStatus::Running);

        assert!(store.force_requeue(job.id, token, "interrupted").await.unwrap());
        let requeued = store.snapshot(job.id).unwrap();
        assert_eq!(requeued.status, JobStatus::Queued);
        assert!(requeued.lock_token.is_none());
        assert_eq!(requeued.last_error.as_deref(), Some("interrupted"));
    }

    #[tokio::test]
    async fn test_scan_extraction_needs_existing_row() {
        let results = MemoryResultStore::new();
        let scan_id = Uuid::new_v4();
        let extracted = ExtractionResult {
            data: serde_json::json!({}),
            confidence: 0.5,
            pages_processed: 1,
            warnings: Vec::new(),
        };

        let err = results.save_scan_extraction(scan_id, &extracted).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == scan_id));

        results.register_scan(scan_id);
        results.save_scan_extraction(scan_id, &extracted).await.unwrap();
        assert_eq!(results.scan_extraction(scan_id).unwrap().pages_processed, 1);
    }

    #[tokio::test]
    async fn test_release_returns_running_job_to_queue() {
        let store = MemoryJobStore::new();
        let job = store.enqueue(lookup_job()).await.unwrap();
        let token = Uuid::new_v4();
        store.try_claim(job.id, token).await.unwrap();

        assert!(store.release_lock(job.id, token).await.unwrap());
        let released = store.snapshot(job.id).unwrap();
        assert_eq!(released.status, JobStatus::Queued);
        assert!(released.lock_token.is_none());
        assert!(released.locked_at.is_none());
    }
}
