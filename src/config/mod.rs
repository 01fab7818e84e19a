use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::models::job::JobType;
use crate::services::retry::RetryPolicy;
use crate::services::worker::WorkerSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Health/metrics listener address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Comma-separated job types this process handles
    #[serde(default = "default_job_types")]
    pub worker_job_types: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Candidates read per reservation attempt
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    #[serde(default = "default_stale_lock_timeout_ms")]
    pub stale_lock_timeout_ms: u64,

    #[serde(default = "default_stale_lock_check_interval_ms")]
    pub stale_lock_check_interval_ms: u64,

    #[serde(default = "default_shutdown_max_wait_ms")]
    pub shutdown_max_wait_ms: u64,

    #[serde(default = "default_fwc_lookup_timeout_ms")]
    pub fwc_lookup_timeout_ms: u64,

    #[serde(default = "default_mapping_sheet_scan_timeout_ms")]
    pub mapping_sheet_scan_timeout_ms: u64,

    /// Jobs in flight per process. Only 1 is supported.
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// FWC agreement search endpoint (required for `fwc_lookup`)
    #[serde(default)]
    pub fwc_search_url: Option<String>,

    /// Vision extraction endpoint (required for `mapping_sheet_scan`)
    #[serde(default)]
    pub extraction_api_url: Option<String>,

    #[serde(default)]
    pub extraction_api_key: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_job_types() -> String {
    "fwc_lookup,mapping_sheet_scan".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_candidate_limit() -> usize {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    5_000
}

fn default_retry_max_delay_ms() -> u64 {
    60_000
}

fn default_stale_lock_timeout_ms() -> u64 {
    10 * 60 * 1000
}

fn default_stale_lock_check_interval_ms() -> u64 {
    5 * 60 * 1000
}

fn default_shutdown_max_wait_ms() -> u64 {
    270_000
}

fn default_fwc_lookup_timeout_ms() -> u64 {
    120_000
}

fn default_mapping_sheet_scan_timeout_ms() -> u64 {
    240_000
}

fn default_worker_concurrency() -> usize {
    1
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Unknown job type in WORKER_JOB_TYPES: {0}")]
    UnknownJobType(String),

    #[error("{job_type} jobs need {variable} to be set")]
    MissingCollaborator {
        job_type: JobType,
        variable: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Ok(envy::from_env()?)
    }

    /// Parse the configured capabilities, deduplicated and sorted.
    pub fn job_types(&self) -> Result<Vec<JobType>, ConfigError> {
        let mut job_types = Vec::new();
        for name in self.worker_job_types.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let job_type =
                JobType::from_str(name).map_err(|_| ConfigError::UnknownJobType(name.to_string()))?;
            if !job_types.contains(&job_type) {
                job_types.push(job_type);
            }
        }
        job_types.sort();
        Ok(job_types)
    }

    /// Reject unusable settings and warn about risky ones. Returns the
    /// validated capabilities.
    pub fn validate(&self) -> Result<Vec<JobType>, ConfigError> {
        let job_types = self.job_types()?;
        if job_types.is_empty() {
            return Err(ConfigError::Invalid("WORKER_JOB_TYPES is empty".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("POLL_INTERVAL_MS must be positive".to_string()));
        }
        if self.candidate_limit == 0 {
            return Err(ConfigError::Invalid("CANDIDATE_LIMIT must be positive".to_string()));
        }
        if self.worker_concurrency == 0 {
            return Err(ConfigError::Invalid("WORKER_CONCURRENCY must be positive".to_string()));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(ConfigError::Invalid(
                "RETRY_MAX_DELAY_MS must not be below RETRY_BASE_DELAY_MS".to_string(),
            ));
        }

        for job_type in &job_types {
            match job_type {
                JobType::FwcLookup if self.fwc_search_url.is_none() => {
                    return Err(ConfigError::MissingCollaborator {
                        job_type: *job_type,
                        variable: "FWC_SEARCH_URL",
                    });
                }
                JobType::MappingSheetScan if self.extraction_api_url.is_none() => {
                    return Err(ConfigError::MissingCollaborator {
                        job_type: *job_type,
                        variable: "EXTRACTION_API_URL",
                    });
                }
                JobType::MappingSheetScan if self.extraction_api_key.is_none() => {
                    return Err(ConfigError::MissingCollaborator {
                        job_type: *job_type,
                        variable: "EXTRACTION_API_KEY",
                    });
                }
                _ => {}
            }

            let timeout_ms = self.processing_timeout(*job_type).as_millis() as u64;
            if self.shutdown_max_wait_ms <= timeout_ms {
                tracing::warn!(
                    job_type = %job_type,
                    shutdown_max_wait_ms = self.shutdown_max_wait_ms,
                    processing_timeout_ms = timeout_ms,
                    "Shutdown wait does not exceed processing timeout, in-flight jobs will be force-requeued"
                );
            }
            if self.stale_lock_timeout_ms <= timeout_ms {
                tracing::warn!(
                    job_type = %job_type,
                    stale_lock_timeout_ms = self.stale_lock_timeout_ms,
                    processing_timeout_ms = timeout_ms,
                    "Stale lock timeout does not exceed processing timeout, live jobs may be reclaimed"
                );
            }
        }

        if self.worker_concurrency > 1 {
            tracing::warn!(
                worker_concurrency = self.worker_concurrency,
                "Only one job in flight per process is supported, running with concurrency 1"
            );
        }

        Ok(job_types)
    }

    pub fn processing_timeout(&self, job_type: JobType) -> Duration {
        match job_type {
            JobType::FwcLookup => Duration::from_millis(self.fwc_lookup_timeout_ms),
            JobType::MappingSheetScan => Duration::from_millis(self.mapping_sheet_scan_timeout_ms),
        }
    }

    pub fn shutdown_max_wait(&self) -> Duration {
        Duration::from_millis(self.shutdown_max_wait_ms)
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            candidate_limit: self.candidate_limit,
            stale_lock_timeout: Duration::from_millis(self.stale_lock_timeout_ms),
            stale_lock_check_interval: Duration::from_millis(self.stale_lock_check_interval_ms),
            retry: RetryPolicy::new(
                Duration::from_millis(self.retry_base_delay_ms),
                Duration::from_millis(self.retry_max_delay_ms),
            ),
            ..WorkerSettings::default()
        }
    }
}
