use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::results::{ExtractionResult, FwcSearchResult};
use crate::services::results::ResultStore;
use crate::services::store::StoreError;

#[derive(Clone)]
pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    /// Replace an employer's stored search results in one transaction.
    async fn save_fwc_results(
        &self,
        employer_id: Uuid,
        results: &[FwcSearchResult],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM fwc_lookup_results WHERE employer_id = $1")
            .bind(employer_id)
            .execute(&mut *tx)
            .await?;

        for result in results {
            sqlx::query(
                r#"
                INSERT INTO fwc_lookup_results
                    (employer_id, title, agreement_id, status, approved_date, expiry_date,
                     document_url, relevance)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(employer_id)
            .bind(&result.title)
            .bind(&result.agreement_id)
            .bind(&result.status)
            .bind(result.approved_date)
            .bind(result.expiry_date)
            .bind(&result.document_url)
            .bind(result.relevance)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_scan_extraction(
        &self,
        scan_id: Uuid,
        result: &ExtractionResult,
    ) -> Result<(), StoreError> {
        let extracted = serde_json::to_value(result)?;

        let updated = sqlx::query(
            r#"
            UPDATE mapping_sheet_scans
            SET status = 'completed',
                extracted_data = $2,
                confidence = $3,
                page_count = $4,
                extraction_completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(scan_id)
        .bind(extracted)
        .bind(result.confidence)
        .bind(i32::try_from(result.pages_processed).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(scan_id));
        }
        Ok(())
    }
}
