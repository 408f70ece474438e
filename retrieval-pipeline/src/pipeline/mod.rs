pub mod config;

use std::sync::Arc;

use common::{
    error::{AppError, BackendError},
    utils::retry::retry_transient,
};
use tracing::{debug, info, instrument, warn};

use crate::{query::QueryContext, scoring::rank_passages, Passage, SearchIndex};

use config::{clamp_top_k, SearchTuning};

/// Result of a successful search call. An empty index answer is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Matches(Vec<Passage>),
    NoMatches,
}

impl SearchOutcome {
    pub fn passages(&self) -> &[Passage] {
        match self {
            SearchOutcome::Matches(passages) => passages,
            SearchOutcome::NoMatches => &[],
        }
    }
}

/// Search side of the index: bounded, retried, deterministically ordered queries.
#[derive(Clone)]
pub struct SearchClient {
    index: Arc<dyn SearchIndex>,
    tuning: SearchTuning,
}

impl SearchClient {
    pub fn new(index: Arc<dyn SearchIndex>, tuning: SearchTuning) -> Self {
        Self { index, tuning }
    }

    pub fn tuning(&self) -> &SearchTuning {
        &self.tuning
    }

    /// Passages for `context`, at most `top_k` (clamped to 1..=20), highest score first.
    #[instrument(skip_all, fields(source_uri = %context.source_uri, top_k = top_k))]
    pub async fn query(
        &self,
        context: &QueryContext,
        top_k: usize,
    ) -> Result<SearchOutcome, AppError> {
        let top_k = clamp_top_k(top_k);
        let request = context.search_request(top_k);
        let timeout = self.tuning.timeout;
        let index = &self.index;
        let request_ref = &request;

        let raw = retry_transient(&self.tuning.retry, "search", move || async move {
            tokio::time::timeout(timeout, index.search(request_ref))
                .await
                .map_err(|_| {
                    BackendError::Transient(format!(
                        "search timed out after {}s",
                        timeout.as_secs()
                    ))
                })?
        })
        .await
        .map_err(|err| match err {
            BackendError::Transient(message) => {
                warn!(error = %message, "Search attempts exhausted");
                AppError::TransientSearch {
                    message,
                    retry_after: self.tuning.retry.retry_after,
                }
            }
            BackendError::Permanent(message) => AppError::Backend(message),
            BackendError::NotFound(message) => {
                AppError::Backend(format!("search backend resource missing: {message}"))
            }
        })?;

        let returned = raw.len();
        let ranked = rank_passages(raw, top_k);
        debug!(returned, kept = ranked.len(), "Search completed");

        if ranked.is_empty() {
            info!(query = %context.query, "Search returned no passages");
            Ok(SearchOutcome::NoMatches)
        } else {
            Ok(SearchOutcome::Matches(ranked))
        }
    }
}
