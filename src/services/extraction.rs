use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::models::job::{JobRecord, JobType};
use crate::models::results::{ExtractionResult, ScanDocument};
use crate::services::processor::{
    CollaboratorError, ProcessSummary, Processor, ProcessorError, ProgressReporter,
};
use crate::services::results::ResultStore;

/// Turns a scanned mapping sheet into structured data.
#[async_trait]
pub trait SheetExtractor: Send + Sync {
    async fn extract(&self, document: &ScanDocument) -> Result<ExtractionResult, CollaboratorError>;
}

/// Client for a hosted vision/LLM extraction endpoint.
pub struct VisionExtractionClient {
    http: Client,
    api_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ExtractionResponse {
    result: ExtractionResult,
}

impl VisionExtractionClient {
    pub fn new(api_url: &str, api_key: &str) -> Result<Self, CollaboratorError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(180))
            .build()?;

        Ok(Self {
            http,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn download(&self, file_url: &str) -> Result<Vec<u8>, CollaboratorError> {
        let response = self.http.get(file_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Upstream {
                status: status.as_u16(),
                body: format!("download of {file_url} failed"),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SheetExtractor for VisionExtractionClient {
    /// Download the PDF and send it to the extraction model.
    async fn extract(&self, document: &ScanDocument) -> Result<ExtractionResult, CollaboratorError> {
        let pdf = self.download(&document.file_url).await?;

        let prompt = concat!(
            "Extract the project mapping sheet in this PDF as JSON with the fields: ",
            "project (name, address, value, builder), site_contacts (role, name, phone, email), ",
            "subcontractors (trade, company, eba_status). ",
            "Return ONLY valid JSON."
        );

        let request_body = serde_json::json!({
            "document": base64::engine::general_purpose::STANDARD.encode(&pdf),
            "media_type": "application/pdf",
            "file_name": document.file_name,
            "page_limit": document.page_limit,
            "prompt": prompt,
        });

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let parsed: ExtractionResponse =
            serde_json::from_str(&body).map_err(|e| CollaboratorError::Parse(e.to_string()))?;
        Ok(parsed.result)
    }
}

/// Processor for `mapping_sheet_scan` jobs.
pub struct MappingSheetScanProcessor {
    extractor: Arc<dyn SheetExtractor>,
    results: Arc<dyn ResultStore>,
}

impl MappingSheetScanProcessor {
    pub fn new(extractor: Arc<dyn SheetExtractor>, results: Arc<dyn ResultStore>) -> Self {
        Self { extractor, results }
    }
}

#[async_trait]
impl Processor for MappingSheetScanProcessor {
    fn job_type(&self) -> JobType {
        JobType::MappingSheetScan
    }

    async fn process(
        &self,
        job: &JobRecord,
        progress: &ProgressReporter,
    ) -> Result<ProcessSummary, ProcessorError> {
        let payload = job.decode_payload()?.into_mapping_sheet_scan()?;
        let document = ScanDocument {
            scan_id: payload.scan_id,
            file_url: payload.file_url,
            file_name: payload.file_name,
            project_id: payload.project_id,
            page_limit: payload.page_limit,
        };

        progress.report(0, 1).await;

        let start = std::time::Instant::now();
        let extracted = self.extractor.extract(&document).await?;
        tracing::info!(
            job_id = %job.id,
            scan_id = %document.scan_id,
            extraction_ms = start.elapsed().as_millis() as u64,
            confidence = extracted.confidence,
            pages = extracted.pages_processed,
            "Mapping sheet extraction complete"
        );

        self.results
            .save_scan_extraction(document.scan_id, &extracted)
            .await?;
        progress.report(1, 1).await;

        Ok(ProcessSummary {
            succeeded: 1,
            failed: 0,
        })
    }
}
