use serde::Serialize;
use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::models::job::JobType;
use crate::services::store::JobStore;
use crate::services::worker::WorkerHandle;

/// Configuration values exposed on the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub job_types: Vec<JobType>,
    pub poll_interval_ms: u64,
    pub stale_lock_timeout_ms: u64,
    pub shutdown_max_wait_ms: u64,
    pub worker_concurrency: usize,
}

impl ConfigSummary {
    pub fn new(config: &WorkerConfig, job_types: Vec<JobType>) -> Self {
        Self {
            job_types,
            poll_interval_ms: config.poll_interval_ms,
            stale_lock_timeout_ms: config.stale_lock_timeout_ms,
            shutdown_max_wait_ms: config.shutdown_max_wait_ms,
            // Effective value; larger settings are clamped by validation.
            worker_concurrency: 1,
        }
    }
}

/// Shared state passed to the health and metrics routes.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub worker: WorkerHandle,
    pub config: Arc<ConfigSummary>,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>, worker: WorkerHandle, config: ConfigSummary) -> Self {
        Self {
            store,
            worker,
            config: Arc::new(config),
        }
    }
}
