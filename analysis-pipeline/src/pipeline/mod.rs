mod config;
mod state;

pub use config::AnalysisTuning;

use std::{sync::Arc, time::Instant};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        document_uri::DocumentUri,
        store::StorageManager,
        types::document_reference::{DocumentReference, IndexingStatus},
    },
};
use retrieval_pipeline::{QueryContext, SearchClient, SearchOutcome};
use state_machines::core::GuardError;
use tracing::{info, warn};

use self::state::ready;
use crate::{
    orchestrator::GenerationOrchestrator,
    types::{AnalysisRequest, AnalysisResult},
};

/// Locate, retrieve, generate: the full path from a file reference to study material.
pub struct AnalysisPipeline {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    search: SearchClient,
    orchestrator: GenerationOrchestrator,
    tuning: AnalysisTuning,
}

impl AnalysisPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        search: SearchClient,
        orchestrator: GenerationOrchestrator,
        tuning: AnalysisTuning,
    ) -> Self {
        Self {
            db,
            storage,
            search,
            orchestrator,
            tuning,
        }
    }

    /// Errors cover everything before generation; model trouble is reported inside the result.
    #[tracing::instrument(skip_all, fields(file_name = %request.file_name))]
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AppError> {
        let deadline = self.tuning.deadline;
        tokio::time::timeout(deadline, self.run(request))
            .await
            .map_err(|_| {
                warn!(deadline_secs = deadline.as_secs(), "analysis deadline exceeded");
                AppError::DeadlineExceeded(deadline)
            })?
    }

    async fn run(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AppError> {
        let started = Instant::now();
        let machine = ready();

        let uri = DocumentUri::parse(&request.file_name, self.storage.bucket())?;
        self.storage
            .resolve_document(&uri, &self.tuning.storage_retry, self.tuning.storage_timeout)
            .await?;
        let machine = machine
            .locate()
            .map_err(|(_, guard)| map_guard_error("locate", &guard))?;

        let registered = self.registry_entry(&uri).await;
        let known_locations = registered
            .as_ref()
            .map(DocumentReference::locations)
            .unwrap_or_default();
        let context = QueryContext::for_document(
            &uri,
            request.scope.as_deref(),
            &self.tuning.filter_field,
            &known_locations,
        );
        let passages = match self.search.query(&context, self.tuning.top_k).await? {
            SearchOutcome::Matches(passages) => passages,
            SearchOutcome::NoMatches => return Err(self.no_passages(&uri, registered.as_ref())),
        };
        let machine = machine
            .retrieve()
            .map_err(|(_, guard)| map_guard_error("retrieve", &guard))?;

        let result = self.orchestrator.analyze(&context, &passages).await;
        let _machine = machine
            .generate()
            .map_err(|(_, guard)| map_guard_error("generate", &guard))?;

        info!(
            source_uri = %uri,
            status = result.status.as_str(),
            passages = passages.len(),
            citations = result.citations.len(),
            total_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "analysis finished"
        );
        Ok(result)
    }

    /// Registry entry for the content at `uri`. Lookup failures only narrow the search.
    async fn registry_entry(&self, uri: &DocumentUri) -> Option<DocumentReference> {
        match DocumentReference::find_latest_by_location(&self.db, &uri.to_string()).await {
            Ok(found) => found,
            Err(err) => {
                warn!(error = %err, "registry lookup failed");
                None
            }
        }
    }

    /// An empty search is only final when nothing for the document is still in flight.
    fn no_passages(&self, uri: &DocumentUri, registered: Option<&DocumentReference>) -> AppError {
        let source_uri = uri.to_string();
        match registered {
            Some(reference)
                if matches!(
                    reference.status,
                    IndexingStatus::Pending | IndexingStatus::Submitting
                ) =>
            {
                info!(%source_uri, status = reference.status.as_str(), "document still being indexed");
                AppError::TransientIndexing {
                    message: format!("{source_uri} is still being indexed"),
                    retry_after: self.tuning.indexing_retry_after,
                }
            }
            _ => AppError::NoContext(source_uri),
        }
    }
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid analysis transition during {event}: {guard:?}"
    ))
}
