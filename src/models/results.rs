use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One enterprise agreement returned by the Fair Work Commission search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FwcSearchResult {
    pub title: String,
    pub agreement_id: Option<String>,
    pub status: Option<String>,
    pub approved_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub document_url: Option<String>,
    /// Relevance of the match to the searched employer name (0.0 - 1.0).
    #[serde(default)]
    pub relevance: f64,
}

/// A mapping sheet handed to the extraction collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanDocument {
    pub scan_id: Uuid,
    pub file_url: String,
    pub file_name: Option<String>,
    pub project_id: Option<Uuid>,
    pub page_limit: Option<u32>,
}

/// Structured data pulled out of a mapping sheet scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionResult {
    /// Extracted fields, keyed the way the review UI expects them.
    pub data: serde_json::Value,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub pages_processed: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
