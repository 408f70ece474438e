mod config;
mod context;
mod stages;
mod state;

pub use config::IngestionTuning;

use std::{sync::Arc, time::Instant};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient, document_uri::DocumentUri, store::StorageManager,
        types::document_reference::DocumentReference,
    },
};
use retrieval_pipeline::SearchIndex;
use tracing::info;

use self::{
    context::SubmissionContext,
    stages::{claim, fetch, resolve, write, ClaimStage, WriteStage},
    state::ready,
};

/// What happened to a submitted document.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The content was written to the index by this call.
    Accepted(DocumentReference),
    /// Identical content is already indexed or being indexed; nothing was written.
    Duplicate(DocumentReference),
    /// The referenced object does not exist.
    Rejected { source_uri: String, reason: String },
}

impl SubmitOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SubmitOutcome::Accepted(_) => "accepted",
            SubmitOutcome::Duplicate(_) => "duplicate",
            SubmitOutcome::Rejected { .. } => "rejected",
        }
    }

    pub fn reference(&self) -> Option<&DocumentReference> {
        match self {
            SubmitOutcome::Accepted(reference) | SubmitOutcome::Duplicate(reference) => {
                Some(reference)
            }
            SubmitOutcome::Rejected { .. } => None,
        }
    }
}

#[allow(clippy::module_name_repetitions)]
pub struct IngestionCoordinator {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    index: Arc<dyn SearchIndex>,
    tuning: IngestionTuning,
}

impl IngestionCoordinator {
    pub fn new(
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        index: Arc<dyn SearchIndex>,
        tuning: IngestionTuning,
    ) -> Self {
        Self {
            db,
            storage,
            index,
            tuning,
        }
    }

    pub fn tuning(&self) -> &IngestionTuning {
        &self.tuning
    }

    /// Registry view of the latest content seen at `uri`.
    pub async fn status(&self, uri: &DocumentUri) -> Result<Option<DocumentReference>, AppError> {
        DocumentReference::find_latest_by_location(&self.db, &uri.to_string()).await
    }

    /// Make the document at `uri` searchable, writing it to the index at most once per content.
    #[tracing::instrument(skip_all, fields(source_uri = %uri))]
    pub async fn submit(&self, uri: &DocumentUri) -> Result<SubmitOutcome, AppError> {
        let started = Instant::now();
        let mut ctx = SubmissionContext::new(
            uri,
            self.db.as_ref(),
            &self.storage,
            self.index.as_ref(),
            &self.tuning,
        );

        let machine = ready();
        let machine = match resolve(machine, &mut ctx).await {
            Ok(machine) => machine,
            Err(AppError::NotFound(reason)) => return Ok(rejected(uri, reason)),
            Err(err) => return Err(ctx.abort(err)),
        };

        let machine = match fetch(machine, &mut ctx).await {
            Ok(machine) => machine,
            Err(AppError::NotFound(reason)) => return Ok(rejected(uri, reason)),
            Err(err) => return Err(ctx.abort(err)),
        };

        let machine = match claim(machine, &mut ctx).await.map_err(|err| ctx.abort(err))? {
            ClaimStage::Owned(machine) => machine,
            ClaimStage::Duplicate(reference) => return Ok(SubmitOutcome::Duplicate(reference)),
        };

        match write(machine, &mut ctx).await.map_err(|err| ctx.abort(err))? {
            WriteStage::Indexed(_machine, reference) => {
                info!(
                    fingerprint = %reference.fingerprint,
                    attempts = reference.attempts,
                    total_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "document indexed"
                );
                Ok(SubmitOutcome::Accepted(reference))
            }
            WriteStage::Superseded(reference) => reference
                .record_alias(&self.db, &uri.to_string())
                .await
                .map(SubmitOutcome::Duplicate),
        }
    }
}

fn rejected(uri: &DocumentUri, reason: String) -> SubmitOutcome {
    info!(source_uri = %uri, %reason, "submission rejected, document not found");
    SubmitOutcome::Rejected {
        source_uri: uri.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests;
