use std::sync::Arc;
use uuid::Uuid;

use crate::models::job::{JobEventType, JobRecord, JobType};
use crate::services::events::EventSink;
use crate::services::store::{JobStore, StoreError};

/// Default number of candidates read per reservation attempt.
pub const DEFAULT_CANDIDATE_LIMIT: usize = 5;

/// Picks the next job for a worker: read a few candidates, then try to claim
/// them one by one until a conditional claim succeeds.
pub struct JobReserver {
    store: Arc<dyn JobStore>,
    events: Arc<dyn EventSink>,
    candidate_limit: usize,
}

impl JobReserver {
    pub fn new(store: Arc<dyn JobStore>, events: Arc<dyn EventSink>, candidate_limit: usize) -> Self {
        Self {
            store,
            events,
            candidate_limit,
        }
    }

    /// Reserve the next job of one of `capabilities`.
    ///
    /// Returns `Ok(None)` when nothing is due or every candidate was claimed by
    /// another worker first. Only the candidate query's failure is an error; a
    /// failed claim on one candidate moves on to the next.
    pub async fn reserve_next_job(
        &self,
        capabilities: &[JobType],
    ) -> Result<Option<JobRecord>, StoreError> {
        let candidates = self
            .store
            .find_candidates(capabilities, self.candidate_limit)
            .await?;

        for candidate in candidates {
            let lock_token = Uuid::new_v4();
            match self.store.try_claim(candidate.id, lock_token).await {
                Ok(Some(job)) => {
                    tracing::info!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        attempts = job.attempts,
                        "Job locked"
                    );
                    metrics::counter!("worker_jobs_claimed_total", "job_type" => job.job_type.to_string())
                        .increment(1);
                    self.events
                        .record(
                            job.id,
                            JobEventType::JobLocked,
                            serde_json::json!({
                                "lock_token": lock_token,
                                "attempts": job.attempts,
                            }),
                        )
                        .await;
                    return Ok(Some(job));
                }
                Ok(None) => {
                    tracing::trace!(job_id = %candidate.id, "Lost claim race, trying next candidate");
                }
                Err(e) => {
                    tracing::warn!(job_id = %candidate.id, error = %e, "Claim attempt failed, trying next candidate");
                }
            }
        }

        Ok(None)
    }
}
