use std::time::Duration;

use common::utils::{config::AppConfig, retry::RetryPolicy};

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub storage_timeout: Duration,
    pub storage_retry: RetryPolicy,
    pub index_timeout: Duration,
    pub index_retry: RetryPolicy,
    /// How long a `Submitting` claim is honoured before another submitter may take it over.
    pub submission_lease: Duration,
    pub max_document_bytes: u64,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            storage_timeout: Duration::from_secs(10),
            storage_retry: RetryPolicy::default(),
            index_timeout: Duration::from_secs(30),
            index_retry: RetryPolicy::default(),
            submission_lease: Duration::from_secs(300),
            max_document_bytes: 100 * 1024 * 1024,
        }
    }
}

impl IngestionTuning {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            storage_timeout: Duration::from_secs(config.storage_timeout_secs),
            storage_retry: config.retry_policy(config.storage_attempts),
            index_timeout: Duration::from_secs(config.index_timeout_secs),
            index_retry: config.retry_policy(config.indexing_attempts),
            submission_lease: Duration::from_secs(config.submission_lease_secs),
            max_document_bytes: u64::try_from(config.max_document_bytes).unwrap_or(u64::MAX),
        }
    }
}
