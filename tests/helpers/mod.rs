//! Test helpers: in-memory worker wiring and scripted processors.
#![allow(dead_code)]

use async_trait::async_trait;
use organizing_workers::models::job::{FailureOutcome, JobRecord, JobType, NewJob};
use organizing_workers::models::results::{ExtractionResult, FwcSearchResult, ScanDocument};
use organizing_workers::services::extraction::SheetExtractor;
use organizing_workers::services::fwc::FwcSearch;
use organizing_workers::services::memory::{MemoryEventSink, MemoryJobStore, MemoryResultStore};
use organizing_workers::services::processor::{
    CollaboratorError, ProcessSummary, Processor, ProcessorError, ProcessorRegistry, ProgressReporter,
};
use organizing_workers::services::shutdown::ShutdownCoordinator;
use organizing_workers::services::store::{JobStore, StoreError};
use organizing_workers::services::worker::{Worker, WorkerHandle, WorkerSettings};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// How a [`ScriptedProcessor`] behaves on each call.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    /// Fail the first `n` calls, then succeed.
    FailTimes(u32, &'static str),
    AlwaysFail(&'static str),
    /// Sleep, then succeed.
    Sleep(Duration),
    /// Never finish.
    Hang,
    Panic(&'static str),
}

pub struct ScriptedProcessor {
    job_type: JobType,
    script: Script,
    calls: AtomicU32,
}

impl ScriptedProcessor {
    pub fn new(job_type: JobType, script: Script) -> Self {
        Self {
            job_type,
            script,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor for ScriptedProcessor {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn process(
        &self,
        _job: &JobRecord,
        _progress: &ProgressReporter,
    ) -> Result<ProcessSummary, ProcessorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let done = ProcessSummary {
            succeeded: 1,
            failed: 0,
        };

        match &self.script {
            Script::Succeed => Ok(done),
            Script::FailTimes(n, message) if call < *n => Err(ProcessorError::AllFailed {
                attempted: 1,
                last_error: message.to_string(),
            }),
            Script::FailTimes(..) => Ok(done),
            Script::AlwaysFail(message) => Err(ProcessorError::AllFailed {
                attempted: 1,
                last_error: message.to_string(),
            }),
            Script::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(done)
            }
            Script::Hang => std::future::pending().await,
            Script::Panic(message) => panic!("{message}"),
        }
    }
}

/// Settings small enough for tests to run in milliseconds.
pub fn fast_settings() -> WorkerSettings {
    WorkerSettings {
        poll_interval: Duration::from_millis(10),
        shutdown_poll_interval: Duration::from_millis(10),
        ..WorkerSettings::default()
    }
}

pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub events: Arc<MemoryEventSink>,
    pub results: Arc<MemoryResultStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryJobStore::new()),
            events: Arc::new(MemoryEventSink::new()),
            results: Arc::new(MemoryResultStore::new()),
        }
    }

    pub fn worker(&self, processors: ProcessorRegistry) -> (Worker, ShutdownCoordinator) {
        Worker::new(
            self.store.clone(),
            self.events.clone(),
            processors,
            fast_settings(),
        )
    }

    pub fn job(&self, id: Uuid) -> JobRecord {
        self.store.snapshot(id).expect("job exists")
    }
}

/// Registry with one scripted processor for `fwc_lookup` jobs.
pub fn scripted(script: Script, timeout: Duration) -> (ProcessorRegistry, Arc<ScriptedProcessor>) {
    let processor = Arc::new(ScriptedProcessor::new(JobType::FwcLookup, script));
    let registry = ProcessorRegistry::new().register_arc(processor.clone(), timeout);
    (registry, processor)
}

/// Wait until the worker reports a job in flight.
pub async fn wait_for_current_job(handle: &WorkerHandle) -> Uuid {
    for _ in 0..500 {
        if let Some(current) = handle.current_job() {
            return current.id;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("worker never picked up a job");
}

/// FWC search stand-in. Names listed in `failing` return an upstream error;
/// everything else returns one agreement titled after the searched name.
#[derive(Default)]
pub struct FakeFwcSearch {
    failing: Vec<String>,
    queries: Mutex<Vec<(String, u32)>>,
}

impl FakeFwcSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn queries(&self) -> Vec<(String, u32)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl FwcSearch for FakeFwcSearch {
    async fn search(
        &self,
        employer_name: &str,
        max_results: u32,
    ) -> Result<Vec<FwcSearchResult>, CollaboratorError> {
        self.queries
            .lock()
            .unwrap()
            .push((employer_name.to_string(), max_results));

        if self.failing.iter().any(|n| n == employer_name) {
            return Err(CollaboratorError::Upstream {
                status: 502,
                body: format!("search for {employer_name} failed"),
            });
        }

        Ok(vec![FwcSearchResult {
            title: format!("{employer_name} Enterprise Agreement 2024"),
            agreement_id: Some("AG2024/1234".to_string()),
            status: Some("Approved".to_string()),
            approved_date: chrono::NaiveDate::from_ymd_opt(2024, 3, 1),
            expiry_date: chrono::NaiveDate::from_ymd_opt(2028, 3, 1),
            document_url: None,
            relevance: 0.92,
        }])
    }
}

/// Extraction stand-in returning a fixed result, or an upstream error.
pub struct FakeExtractor {
    pub fail: bool,
}

#[async_trait]
impl SheetExtractor for FakeExtractor {
    async fn extract(&self, document: &ScanDocument) -> Result<ExtractionResult, CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::Upstream {
                status: 500,
                body: "model overloaded".to_string(),
            });
        }

        Ok(ExtractionResult {
            data: serde_json::json!({
                "project": { "name": "Site 42", "builder": "Hutchinson Builders" },
                "file": document.file_name,
            }),
            confidence: 0.87,
            pages_processed: document.page_limit.unwrap_or(1),
            warnings: Vec::new(),
        })
    }
}

fn injected(operation: &str) -> StoreError {
    StoreError::Decode(format!("injected {operation} failure"))
}

/// Wraps a [`MemoryJobStore`] and fails chosen operations on demand.
pub struct FlakyJobStore {
    inner: Arc<MemoryJobStore>,
    fail_candidates: AtomicBool,
    failing_claims: AtomicU32,
    fail_reclaim: AtomicBool,
    candidate_calls: AtomicU32,
}

impl FlakyJobStore {
    pub fn new(inner: Arc<MemoryJobStore>) -> Self {
        Self {
            inner,
            fail_candidates: AtomicBool::new(false),
            failing_claims: AtomicU32::new(0),
            fail_reclaim: AtomicBool::new(false),
            candidate_calls: AtomicU32::new(0),
        }
    }

    pub fn fail_candidates(&self, fail: bool) {
        self.fail_candidates.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `n` claim attempts.
    pub fn fail_next_claims(&self, n: u32) {
        self.failing_claims.store(n, Ordering::SeqCst);
    }

    pub fn fail_reclaim(&self, fail: bool) {
        self.fail_reclaim.store(fail, Ordering::SeqCst);
    }

    pub fn candidate_calls(&self) -> u32 {
        self.candidate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for FlakyJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        self.inner.enqueue(job).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        self.inner.get(id).await
    }

    async fn find_candidates(
        &self,
        job_types: &[JobType],
        limit: usize,
    ) -> Result<Vec<JobRecord>, StoreError> {
        self.candidate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_candidates.load(Ordering::SeqCst) {
            return Err(injected("candidate query"));
        }
        self.inner.find_candidates(job_types, limit).await
    }

    async fn try_claim(&self, id: Uuid, lock_token: Uuid) -> Result<Option<JobRecord>, StoreError> {
        let failing = self
            .failing_claims
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(injected("claim"));
        }
        self.inner.try_claim(id, lock_token).await
    }

    async fn mark_succeeded(&self, id: Uuid, lock_token: Uuid) -> Result<bool, StoreError> {
        self.inner.mark_succeeded(id, lock_token).await
    }

    async fn record_failure(
        &self,
        id: Uuid,
        lock_token: Uuid,
        outcome: &FailureOutcome,
    ) -> Result<bool, StoreError> {
        self.inner.record_failure(id, lock_token, outcome).await
    }

    async fn release_lock(&self, id: Uuid, lock_token: Uuid) -> Result<bool, StoreError> {
        self.inner.release_lock(id, lock_token).await
    }

    async fn force_requeue(&self, id: Uuid, lock_token: Uuid, reason: &str) -> Result<bool, StoreError> {
        self.inner.force_requeue(id, lock_token, reason).await
    }

    async fn reclaim_stale(
        &self,
        job_type: JobType,
        lock_timeout: Duration,
        reason: &str,
    ) -> Result<Vec<Uuid>, StoreError> {
        if self.fail_reclaim.load(Ordering::SeqCst) {
            return Err(injected("stale lock scan"));
        }
        self.inner.reclaim_stale(job_type, lock_timeout, reason).await
    }

    async fn update_progress(
        &self,
        id: Uuid,
        lock_token: Uuid,
        completed: i32,
        total: i32,
    ) -> Result<bool, StoreError> {
        self.inner.update_progress(id, lock_token, completed, total).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}
