use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::models::job::{FailureOutcome, JobRecord};

/// Default first retry delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5);

/// Default ceiling on the retry delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Exponential backoff with a cap, bounded by each job's `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay before the retry that follows attempt number `attempts`:
    /// `min(base * 2^(attempts - 1), max)`.
    pub fn backoff(&self, attempts: i32) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 31) as u32;
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Decide what happens to a job whose latest attempt failed with `error`.
    ///
    /// `job.attempts` already counts the failed attempt, since the claim
    /// increments it.
    pub fn decide(&self, job: &JobRecord, error: &str, now: DateTime<Utc>) -> FailureOutcome {
        let last_error = error.to_string();
        if job.attempts < job.max_attempts {
            let delay = chrono::Duration::from_std(self.backoff(job.attempts))
                .unwrap_or(chrono::Duration::MAX);
            FailureOutcome::Requeue {
                run_at: now.checked_add_signed(delay).unwrap_or(now),
                last_error,
            }
        } else {
            FailureOutcome::Fail { last_error }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{JobStatus, JobType};
    use uuid::Uuid;

    fn job(attempts: i32, max_attempts: i32) -> JobRecord {
        let now = Utc::now();
        JobRecord {
            id: Uuid::new_v4(),
            job_type: JobType::FwcLookup,
            status: JobStatus::Running,
            payload: serde_json::json!({}),
            priority: 1,
            run_at: now,
            attempts,
            max_attempts,
            locked_at: Some(now),
            lock_token: Some(Uuid::new_v4()),
            last_error: None,
            progress_completed: 0,
            progress_total: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn test_backoff_doubles_until_capped() {
        let policy = RetryPolicy::new(Duration::from_millis(5000), Duration::from_millis(60000));
        let delays: Vec<u128> = (1..=6).map(|n| policy.backoff(n).as_millis()).collect();
        assert_eq!(delays, vec![5000, 10000, 20000, 40000, 60000, 60000]);
    }

    #[test]
    fn test_backoff_handles_out_of_range_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), DEFAULT_BASE_DELAY);
        assert_eq!(policy.backoff(-3), DEFAULT_BASE_DELAY);
        assert_eq!(policy.backoff(i32::MAX), DEFAULT_MAX_DELAY);
    }

    #[test]
    fn test_requeues_while_attempts_remain() {
        let policy = RetryPolicy::default();
        let now = Utc::now();

        let outcome = policy.decide(&job(1, 3), "connect ETIMEDOUT", now);
        assert_eq!(
            outcome,
            FailureOutcome::Requeue {
                run_at: now + chrono::Duration::seconds(5),
                last_error: "connect ETIMEDOUT".to_string(),
            }
        );
        assert_eq!(outcome.next_status(), JobStatus::Queued);

        let outcome = policy.decide(&job(2, 3), "navigation timeout", now);
        assert!(matches!(
            outcome,
            FailureOutcome::Requeue { run_at, .. } if run_at == now + chrono::Duration::seconds(10)
        ));
    }

    #[test]
    fn test_fails_when_attempts_exhausted() {
        let policy = RetryPolicy::default();
        let outcome = policy.decide(&job(3, 3), "rate limited", Utc::now());
        assert_eq!(
            outcome,
            FailureOutcome::Fail {
                last_error: "rate limited".to_string()
            }
        );
        assert_eq!(outcome.next_status(), JobStatus::Failed);
        assert_eq!(outcome.last_error(), "rate limited");
    }
}
