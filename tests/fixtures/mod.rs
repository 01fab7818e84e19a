//! Payload fixtures for worker tests.
#![allow(dead_code)]

use organizing_workers::models::job::NewJob;
use organizing_workers::models::payload::{
    FwcEmployer, FwcLookupPayload, JobPayload, MappingSheetScanPayload,
};
use uuid::Uuid;

pub fn employer(name: &str) -> FwcEmployer {
    FwcEmployer {
        employer_id: Uuid::new_v4(),
        employer_name: name.to_string(),
        search_name: None,
    }
}

pub fn fwc_lookup(employers: Vec<FwcEmployer>) -> JobPayload {
    JobPayload::FwcLookup(FwcLookupPayload {
        employers,
        max_results: None,
    })
}

/// A single-employer lookup, the common case in tests.
pub fn fwc_job(max_attempts: i32) -> NewJob {
    NewJob::new(fwc_lookup(vec![employer("Hutchinson Builders")]), max_attempts)
}

pub fn mapping_sheet_scan(file_url: &str) -> MappingSheetScanPayload {
    MappingSheetScanPayload {
        scan_id: Uuid::new_v4(),
        file_url: file_url.to_string(),
        file_name: Some("site-42-mapping.pdf".to_string()),
        project_id: Some(Uuid::new_v4()),
        page_limit: Some(3),
    }
}

pub fn scan_job(max_attempts: i32) -> NewJob {
    NewJob::new(
        JobPayload::MappingSheetScan(mapping_sheet_scan(
            "https://files.example.org/scans/site-42-mapping.pdf",
        )),
        max_attempts,
    )
}
