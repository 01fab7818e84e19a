use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::job::JobEventType;
use crate::services::events::EventSink;

/// Appends events to `worker_job_events`. Insert failures are logged and
/// dropped.
#[derive(Clone)]
pub struct PgEventSink {
    pool: PgPool,
}

impl PgEventSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventSink for PgEventSink {
    async fn record(&self, job_id: Uuid, event_type: JobEventType, payload: serde_json::Value) {
        let event_name: &'static str = event_type.into();

        let result = sqlx::query(
            r#"
            INSERT INTO worker_job_events (job_id, event_type, payload)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(job_id)
        .bind(event_name)
        .bind(payload)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(job_id = %job_id, event_type = event_name, error = %e, "Failed to record job event");
        }
    }
}
