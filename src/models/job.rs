use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::models::payload::{JobPayload, PayloadError};

/// Lifecycle state of a queued job.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses always carry `completed_at` and never a lock.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Discriminates which processor handles a job.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    FwcLookup,
    MappingSheetScan,
}

/// One row of the shared job table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    /// Lower value is served first.
    pub priority: i32,
    pub run_at: DateTime<Utc>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub locked_at: Option<DateTime<Utc>>,
    pub lock_token: Option<Uuid>,
    pub last_error: Option<String>,
    pub progress_completed: i32,
    pub progress_total: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Decode the stored payload into the variant for this row's job type.
    pub fn decode_payload(&self) -> Result<JobPayload, PayloadError> {
        JobPayload::decode(self.job_type, &self.payload)
    }

    /// True when the row satisfies the claim precondition at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Queued && self.run_at <= now && self.lock_token.is_none()
    }
}

/// A job to be enqueued. The job type is taken from the payload variant.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub payload: JobPayload,
    pub priority: i32,
    pub max_attempts: i32,
    pub run_at: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn new(payload: JobPayload, max_attempts: i32) -> Self {
        Self {
            payload,
            priority: 0,
            max_attempts,
            run_at: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }
}

/// How a failed attempt should be written back.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Back to `queued`, eligible again at `run_at`.
    Requeue {
        run_at: DateTime<Utc>,
        last_error: String,
    },
    /// Terminal `failed`.
    Fail { last_error: String },
}

impl FailureOutcome {
    pub fn next_status(&self) -> JobStatus {
        match self {
            Self::Requeue { .. } => JobStatus::Queued,
            Self::Fail { .. } => JobStatus::Failed,
        }
    }

    pub fn last_error(&self) -> &str {
        match self {
            Self::Requeue { last_error, .. } | Self::Fail { last_error } => last_error,
        }
    }
}

/// Audit-trail event kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobEventType {
    JobLocked,
    JobSucceeded,
    JobRetryScheduled,
    JobFailed,
    JobProgress,
    JobLockReclaimed,
    JobInterrupted,
}

/// One entry of the append-only audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub event_type: JobEventType,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_round_trips_through_text() {
        assert_eq!(JobStatus::Running.to_string(), "running");
        assert_eq!(JobStatus::from_str("queued").unwrap(), JobStatus::Queued);
        assert!(JobStatus::from_str("processing").is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_job_type_names() {
        assert_eq!(JobType::FwcLookup.to_string(), "fwc_lookup");
        assert_eq!(
            JobType::from_str("mapping_sheet_scan").unwrap(),
            JobType::MappingSheetScan
        );
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(JobEventType::JobRetryScheduled.to_string(), "job_retry_scheduled");
    }
}
