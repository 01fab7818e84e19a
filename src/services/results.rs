use async_trait::async_trait;
use uuid::Uuid;

use crate::models::results::{ExtractionResult, FwcSearchResult};
use crate::services::store::StoreError;

/// Where processors put what their collaborators returned.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Replace the stored FWC search results for an employer.
    async fn save_fwc_results(
        &self,
        employer_id: Uuid,
        results: &[FwcSearchResult],
    ) -> Result<(), StoreError>;

    /// Attach extracted data to a mapping sheet scan.
    async fn save_scan_extraction(
        &self,
        scan_id: Uuid,
        result: &ExtractionResult,
    ) -> Result<(), StoreError>;
}
