//! Fair Work Commission agreement lookups.
//!
//! The search itself is an external collaborator behind [`FwcSearch`]; this
//! module only drives it per employer and stores what comes back.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::models::job::{JobRecord, JobType};
use crate::models::results::FwcSearchResult;
use crate::services::processor::{
    CollaboratorError, ProcessSummary, Processor, ProcessorError, ProgressReporter,
};
use crate::services::results::ResultStore;

/// Default number of agreements kept per employer.
const DEFAULT_MAX_RESULTS: u32 = 10;

#[async_trait]
pub trait FwcSearch: Send + Sync {
    /// Search enterprise agreements for an employer name.
    async fn search(
        &self,
        employer_name: &str,
        max_results: u32,
    ) -> Result<Vec<FwcSearchResult>, CollaboratorError>;
}

/// Client for a JSON agreement search endpoint.
pub struct HttpFwcSearch {
    http: reqwest::Client,
    search_url: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<FwcSearchResult>,
}

impl HttpFwcSearch {
    pub fn new(search_url: &str) -> Result<Self, CollaboratorError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("organizing-workers/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            http,
            search_url: search_url.to_string(),
        })
    }
}

#[async_trait]
impl FwcSearch for HttpFwcSearch {
    async fn search(
        &self,
        employer_name: &str,
        max_results: u32,
    ) -> Result<Vec<FwcSearchResult>, CollaboratorError> {
        let limit = max_results.to_string();
        let response = self
            .http
            .get(&self.search_url)
            .query(&[("q", employer_name), ("limit", limit.as_str())])
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
        let parsed: SearchResponse =
            serde_json::from_str(&body).map_err(|e| CollaboratorError::Parse(e.to_string()))?;

        let mut results = parsed.results;
        results.truncate(max_results as usize);
        Ok(results)
    }
}

/// Processor for `fwc_lookup` jobs.
///
/// Each employer is searched independently. A job with some failed employers
/// still succeeds (the summary carries the counts); it only fails when every
/// employer failed.
pub struct FwcLookupProcessor {
    search: Arc<dyn FwcSearch>,
    results: Arc<dyn ResultStore>,
}

impl FwcLookupProcessor {
    pub fn new(search: Arc<dyn FwcSearch>, results: Arc<dyn ResultStore>) -> Self {
        Self { search, results }
    }
}

#[async_trait]
impl Processor for FwcLookupProcessor {
    fn job_type(&self) -> JobType {
        JobType::FwcLookup
    }

    async fn process(
        &self,
        job: &JobRecord,
        progress: &ProgressReporter,
    ) -> Result<ProcessSummary, ProcessorError> {
        let payload = job.decode_payload()?.into_fwc_lookup()?;
        let max_results = payload.max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        let total = payload.employers.len() as u32;

        let mut summary = ProcessSummary::default();
        let mut last_error = None;
        progress.report(0, total).await;

        for (index, employer) in payload.employers.iter().enumerate() {
            let outcome = match self.search.search(employer.search_term(), max_results).await {
                Ok(found) => {
                    tracing::debug!(
                        job_id = %job.id,
                        employer_id = %employer.employer_id,
                        agreements = found.len(),
                        "FWC search complete"
                    );
                    self.results
                        .save_fwc_results(employer.employer_id, &found)
                        .await
                        .map_err(ProcessorError::from)
                }
                Err(e) => Err(ProcessorError::from(e)),
            };

            match outcome {
                Ok(()) => summary.succeeded += 1,
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        employer_id = %employer.employer_id,
                        error = %e,
                        "FWC lookup failed for employer"
                    );
                    summary.failed += 1;
                    last_error = Some(e.to_string());
                }
            }

            progress.report(index as u32 + 1, total).await;
        }

        match last_error {
            Some(last_error) if summary.succeeded == 0 => Err(ProcessorError::AllFailed {
                attempted: summary.failed,
                last_error,
            }),
            _ => Ok(summary),
        }
    }
}
