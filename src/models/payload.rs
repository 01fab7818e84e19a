//! Typed job payloads.
//!
//! The job table stores payloads as opaque JSON next to a `job_type` column.
//! Processors decode them once, through [`JobPayload::decode`], into the shape
//! registered for that type and validate them before doing any work.

use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobType;

/// An employer to look up in the Fair Work Commission agreement search.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct FwcEmployer {
    #[garde(skip)]
    pub employer_id: Uuid,

    #[garde(length(min = 1, max = 300))]
    pub employer_name: String,

    /// Search text to use instead of the employer's name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 1, max = 300))]
    pub search_name: Option<String>,
}

impl FwcEmployer {
    pub fn search_term(&self) -> &str {
        self.search_name.as_deref().unwrap_or(&self.employer_name)
    }
}

/// Input for an `fwc_lookup` job.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct FwcLookupPayload {
    #[garde(length(min = 1, max = 500), dive)]
    pub employers: Vec<FwcEmployer>,

    /// Cap on agreements kept per employer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 1, max = 100))]
    pub max_results: Option<u32>,
}

/// Input for a `mapping_sheet_scan` job.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct MappingSheetScanPayload {
    #[garde(skip)]
    pub scan_id: Uuid,

    #[garde(url)]
    pub file_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 1, max = 255))]
    pub file_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub project_id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 1, max = 50))]
    pub page_limit: Option<u32>,
}

/// Payload of a job, keyed by job type.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    FwcLookup(FwcLookupPayload),
    MappingSheetScan(MappingSheetScanPayload),
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Payload for {job_type} does not match its schema: {source}")]
    Schema {
        job_type: JobType,
        #[source]
        source: serde_json::Error,
    },

    #[error("Payload for {job_type} failed validation: {report}")]
    Invalid {
        job_type: JobType,
        report: garde::Report,
    },

    #[error("Expected a {expected} payload, got {actual}")]
    WrongType { expected: JobType, actual: JobType },
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::FwcLookup(_) => JobType::FwcLookup,
            Self::MappingSheetScan(_) => JobType::MappingSheetScan,
        }
    }

    /// The JSON stored in the `payload` column.
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::FwcLookup(p) => serde_json::to_value(p),
            Self::MappingSheetScan(p) => serde_json::to_value(p),
        }
    }

    /// Decode and validate a stored payload for the given job type.
    pub fn decode(job_type: JobType, value: &serde_json::Value) -> Result<Self, PayloadError> {
        match job_type {
            JobType::FwcLookup => {
                let payload: FwcLookupPayload = parse(job_type, value)?;
                payload
                    .validate()
                    .map_err(|report| PayloadError::Invalid { job_type, report })?;
                Ok(Self::FwcLookup(payload))
            }
            JobType::MappingSheetScan => {
                let payload: MappingSheetScanPayload = parse(job_type, value)?;
                payload
                    .validate()
                    .map_err(|report| PayloadError::Invalid { job_type, report })?;
                Ok(Self::MappingSheetScan(payload))
            }
        }
    }

    pub fn into_fwc_lookup(self) -> Result<FwcLookupPayload, PayloadError> {
        match self {
            Self::FwcLookup(p) => Ok(p),
            other => Err(PayloadError::WrongType {
                expected: JobType::FwcLookup,
                actual: other.job_type(),
            }),
        }
    }

    pub fn into_mapping_sheet_scan(self) -> Result<MappingSheetScanPayload, PayloadError> {
        match self {
            Self::MappingSheetScan(p) => Ok(p),
            other => Err(PayloadError::WrongType {
                expected: JobType::MappingSheetScan,
                actual: other.job_type(),
            }),
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(
    job_type: JobType,
    value: &serde_json::Value,
) -> Result<T, PayloadError> {
    T::deserialize(value).map_err(|source| PayloadError::Schema { job_type, source })
}
