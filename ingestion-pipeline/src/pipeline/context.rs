use bytes::Bytes;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        document_uri::DocumentUri,
        store::{DocumentMetadata, StorageManager},
        types::document_reference::DocumentReference,
    },
};
use retrieval_pipeline::SearchIndex;
use tracing::error;

use super::config::IngestionTuning;

/// Per-submission working set passed between stages.
pub struct SubmissionContext<'a> {
    pub uri: &'a DocumentUri,
    pub db: &'a SurrealDbClient,
    pub storage: &'a StorageManager,
    pub index: &'a dyn SearchIndex,
    pub tuning: &'a IngestionTuning,
    pub metadata: Option<DocumentMetadata>,
    pub content: Option<Bytes>,
    pub fingerprint: Option<String>,
    pub claimed: Option<DocumentReference>,
}

impl<'a> SubmissionContext<'a> {
    pub fn new(
        uri: &'a DocumentUri,
        db: &'a SurrealDbClient,
        storage: &'a StorageManager,
        index: &'a dyn SearchIndex,
        tuning: &'a IngestionTuning,
    ) -> Self {
        Self {
            uri,
            db,
            storage,
            index,
            tuning,
            metadata: None,
            content: None,
            fingerprint: None,
            claimed: None,
        }
    }

    /// Fresh registry entry for the fetched content.
    pub fn candidate(&self) -> Result<DocumentReference, AppError> {
        let metadata = self.metadata.as_ref().ok_or_else(|| {
            AppError::InternalError("document metadata expected after resolve stage".into())
        })?;
        let fingerprint = self.fingerprint.clone().ok_or_else(|| {
            AppError::InternalError("content fingerprint expected after fetch stage".into())
        })?;

        Ok(DocumentReference::new(
            self.uri.to_string(),
            fingerprint,
            metadata.content_type.clone(),
            metadata.size_bytes,
        ))
    }

    pub fn abort(&self, err: AppError) -> AppError {
        error!(
            source_uri = %self.uri,
            fingerprint = self.fingerprint.as_deref().unwrap_or("unknown"),
            error = %err,
            "document submission aborted"
        );
        err
    }
}
