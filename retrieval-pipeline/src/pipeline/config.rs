use std::time::Duration;

use common::utils::{config::AppConfig, retry::RetryPolicy};

/// Largest result window a caller may request.
pub const MAX_TOP_K: usize = 20;

/// Tunable parameters for search calls.
#[derive(Debug, Clone)]
pub struct SearchTuning {
    pub default_top_k: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SearchTuning {
    fn default() -> Self {
        Self {
            default_top_k: 8,
            timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
        }
    }
}

impl SearchTuning {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            default_top_k: clamp_top_k(config.retrieval_top_k),
            timeout: Duration::from_secs(config.search_timeout_secs),
            retry: config.retry_policy(config.search_attempts),
        }
    }
}

pub fn clamp_top_k(top_k: usize) -> usize {
    top_k.clamp(1, MAX_TOP_K)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_k_is_clamped_to_valid_window() {
        assert_eq!(clamp_top_k(0), 1);
        assert_eq!(clamp_top_k(7), 7);
        assert_eq!(clamp_top_k(500), MAX_TOP_K);
    }

    #[test]
    fn tuning_follows_app_config() {
        let config = AppConfig {
            retrieval_top_k: 50,
            search_timeout_secs: 3,
            search_attempts: 5,
            ..Default::default()
        };
        let tuning = SearchTuning::from_app_config(&config);

        assert_eq!(tuning.default_top_k, MAX_TOP_K);
        assert_eq!(tuning.timeout, Duration::from_secs(3));
        assert_eq!(tuning.retry.max_attempts, 5);
    }
}
