use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{FailureOutcome, JobRecord, JobStatus, JobType, NewJob};
use crate::services::store::{JobStore, StoreError};

macro_rules! job_columns {
    () => {
        "id, job_type, status, payload, priority, run_at, attempts, max_attempts, locked_at, \
         lock_token, last_error, progress_completed, progress_total, created_at, updated_at, \
         completed_at"
    };
}

/// Job store backed by the `worker_jobs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn job_from_row(row: &PgRow) -> Result<JobRecord, StoreError> {
    let job_type: String = row.try_get("job_type")?;
    let status: String = row.try_get("status")?;

    Ok(JobRecord {
        id: row.try_get("id")?,
        job_type: JobType::from_str(&job_type)
            .map_err(|_| StoreError::Decode(format!("unknown job_type '{job_type}'")))?,
        status: JobStatus::from_str(&status)
            .map_err(|_| StoreError::Decode(format!("unknown status '{status}'")))?,
        payload: row.try_get("payload")?,
        priority: row.try_get("priority")?,
        run_at: row.try_get("run_at")?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        locked_at: row.try_get("locked_at")?,
        lock_token: row.try_get("lock_token")?,
        last_error: row.try_get("last_error")?,
        progress_completed: row.try_get("progress_completed")?,
        progress_total: row.try_get("progress_total")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        let job_type: &'static str = job.payload.job_type().into();
        let payload = job.payload.to_value()?;

        let row = sqlx::query(concat!(
            r#"
            INSERT INTO worker_jobs (job_type, status, payload, priority, run_at, max_attempts)
            VALUES ($1, 'queued', $2, $3, COALESCE($4::timestamptz, NOW()), $5)
            RETURNING "#,
            job_columns!()
        ))
        .bind(job_type)
        .bind(payload)
        .bind(job.priority)
        .bind(job.run_at)
        .bind(job.max_attempts)
        .fetch_one(&self.pool)
        .await?;

        job_from_row(&row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query(concat!("SELECT ", job_columns!(), " FROM worker_jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn find_candidates(
        &self,
        job_types: &[JobType],
        limit: usize,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let job_types: Vec<String> = job_types.iter().map(ToString::to_string).collect();

        let rows = sqlx::query(concat!(
            "SELECT ",
            job_columns!(),
            r#"
            FROM worker_jobs
            WHERE status = 'queued'
              AND job_type = ANY($1)
              AND run_at <= NOW()
              AND lock_token IS NULL
            ORDER BY priority ASC, created_at ASC
            LIMIT $2
            "#
        ))
        .bind(job_types)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn try_claim(&self, id: Uuid, lock_token: Uuid) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query(concat!(
            r#"
            UPDATE worker_jobs
            SET lock_token = $2,
                status = 'running',
                attempts = attempts + 1,
                locked_at = NOW(),
                last_error = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND status = 'queued'
              AND run_at <= NOW()
              AND lock_token IS NULL
            RETURNING "#,
            job_columns!()
        ))
        .bind(id)
        .bind(lock_token)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn mark_succeeded(&self, id: Uuid, lock_token: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE worker_jobs
            SET status = 'succeeded',
                lock_token = NULL,
                locked_at = NULL,
                last_error = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND lock_token = $2
            "#,
        )
        .bind(id)
        .bind(lock_token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_failure(
        &self,
        id: Uuid,
        lock_token: Uuid,
        outcome: &FailureOutcome,
    ) -> Result<bool, StoreError> {
        let result = match outcome {
            FailureOutcome::Requeue { run_at, last_error } => {
                sqlx::query(
                    r#"
                    UPDATE worker_jobs
                    SET status = 'queued',
                        run_at = $3,
                        last_error = $4,
                        lock_token = NULL,
                        locked_at = NULL,
                        updated_at = NOW()
                    WHERE id = $1 AND lock_token = $2
                    "#,
                )
                .bind(id)
                .bind(lock_token)
                .bind(run_at)
                .bind(last_error)
                .execute(&self.pool)
                .await?
            }
            FailureOutcome::Fail { last_error } => {
                sqlx::query(
                    r#"
                    UPDATE worker_jobs
                    SET status = 'failed',
                        last_error = $3,
                        lock_token = NULL,
                        locked_at = NULL,
                        completed_at = NOW(),
                        updated_at = NOW()
                    WHERE id = $1 AND lock_token = $2
                    "#,
                )
                .bind(id)
                .bind(lock_token)
                .bind(last_error)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }

    async fn release_lock(&self, id: Uuid, lock_token: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE worker_jobs
            SET lock_token = NULL,
                locked_at = NULL,
                status = CASE WHEN status = 'running' THEN 'queued' ELSE status END,
                updated_at = NOW()
            WHERE id = $1 AND lock_token = $2
            "#,
        )
        .bind(id)
        .bind(lock_token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn force_requeue(&self, id: Uuid, lock_token: Uuid, reason: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE worker_jobs
            SET status = 'queued',
                lock_token = NULL,
                locked_at = NULL,
                last_error = $3,
                run_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND lock_token = $2 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(lock_token)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reclaim_stale(
        &self,
        job_type: JobType,
        lock_timeout: Duration,
        reason: &str,
    ) -> Result<Vec<Uuid>, StoreError> {
        let job_type: &'static str = job_type.into();

        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE worker_jobs
            SET status = 'queued',
                lock_token = NULL,
                locked_at = NULL,
                last_error = $3,
                run_at = NOW(),
                updated_at = NOW()
            WHERE status = 'running'
              AND job_type = $1
              AND locked_at < NOW() - ($2::bigint * INTERVAL '1 millisecond')
            RETURNING id
            "#,
        )
        .bind(job_type)
        .bind(millis(lock_timeout))
        .bind(reason)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn update_progress(
        &self,
        id: Uuid,
        lock_token: Uuid,
        completed: i32,
        total: i32,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE worker_jobs
            SET progress_completed = $3,
                progress_total = $4,
                updated_at = NOW()
            WHERE id = $1 AND lock_token = $2
            "#,
        )
        .bind(id)
        .bind(lock_token)
        .bind(completed)
        .bind(total)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
