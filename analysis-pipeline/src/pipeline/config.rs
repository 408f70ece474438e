use std::time::Duration;

use common::utils::{config::AppConfig, retry::RetryPolicy};

#[derive(Debug, Clone)]
pub struct AnalysisTuning {
    /// Overall budget for one analysis request.
    pub deadline: Duration,
    pub top_k: usize,
    pub filter_field: String,
    pub storage_timeout: Duration,
    pub storage_retry: RetryPolicy,
    /// Hint returned while a document without passages is still being indexed.
    pub indexing_retry_after: Duration,
}

impl Default for AnalysisTuning {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(120),
            top_k: 8,
            filter_field: "source_uri".to_string(),
            storage_timeout: Duration::from_secs(10),
            storage_retry: RetryPolicy::default(),
            indexing_retry_after: Duration::from_secs(30),
        }
    }
}

impl AnalysisTuning {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            deadline: config.request_deadline(),
            top_k: config.retrieval_top_k,
            filter_field: config.search_filter_field.clone(),
            storage_timeout: Duration::from_secs(config.storage_timeout_secs),
            storage_retry: config.retry_policy(config.storage_attempts),
            indexing_retry_after: Duration::from_secs(config.retry_after_secs),
        }
    }
}
