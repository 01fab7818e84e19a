//! Stale lock reclaimer: returns jobs whose worker died mid-flight to the queue.

use std::sync::Arc;
use std::time::Duration;

use crate::models::job::{JobEventType, JobType};
use crate::services::events::EventSink;
use crate::services::store::JobStore;

pub const STALE_LOCK_MESSAGE: &str = "Lock released due to timeout (worker may have crashed)";

pub struct StaleLockReclaimer {
    store: Arc<dyn JobStore>,
    events: Arc<dyn EventSink>,
}

impl StaleLockReclaimer {
    pub fn new(store: Arc<dyn JobStore>, events: Arc<dyn EventSink>) -> Self {
        Self { store, events }
    }

    /// Requeue every `running` job of `job_type` whose lock is older than
    /// `lock_timeout`. Failures are logged and count as zero reclaimed.
    pub async fn reclaim_stale_locks(&self, job_type: JobType, lock_timeout: Duration) -> usize {
        let reclaimed = match self
            .store
            .reclaim_stale(job_type, lock_timeout, STALE_LOCK_MESSAGE)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(job_type = %job_type, error = %e, "Stale lock scan failed");
                return 0;
            }
        };

        if reclaimed.is_empty() {
            tracing::debug!(job_type = %job_type, "No stale locks found");
            return 0;
        }

        metrics::counter!("worker_stale_locks_reclaimed_total", "job_type" => job_type.to_string())
            .increment(reclaimed.len() as u64);

        for job_id in &reclaimed {
            tracing::warn!(job_id = %job_id, job_type = %job_type, "Reclaimed stale job lock");
            self.events
                .record(
                    *job_id,
                    JobEventType::JobLockReclaimed,
                    serde_json::json!({ "lock_timeout_ms": lock_timeout.as_millis() as u64 }),
                )
                .await;
        }

        reclaimed.len()
    }
}
