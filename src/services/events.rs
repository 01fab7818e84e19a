//! Best-effort job lifecycle audit trail.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::job::JobEventType;

/// Sink for job lifecycle events.
///
/// `record` has no error channel: implementations log and drop their own
/// failures, so writing the audit trail can never change how a job is handled.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, job_id: Uuid, event_type: JobEventType, payload: serde_json::Value);
}

/// Discards every event.
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn record(&self, _job_id: Uuid, _event_type: JobEventType, _payload: serde_json::Value) {}
}
