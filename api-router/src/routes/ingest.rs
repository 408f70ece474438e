use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};
use common::storage::{
    document_uri::DocumentUri, types::document_reference::DocumentReference,
};
use ingestion_pipeline::SubmitOutcome;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub file_name: String,
}

/// Registry entry as reported to clients; claim bookkeeping stays internal.
#[derive(Debug, Serialize)]
pub struct DocumentStatus {
    pub document_id: String,
    pub source_uri: String,
    pub fingerprint: String,
    pub status: &'static str,
    pub attempts: u32,
    pub size_bytes: u64,
}

impl From<&DocumentReference> for DocumentStatus {
    fn from(reference: &DocumentReference) -> Self {
        Self {
            document_id: reference.backend_document_id(),
            source_uri: reference.source_uri.clone(),
            fingerprint: reference.fingerprint.clone(),
            status: reference.status.as_str(),
            attempts: reference.attempts,
            size_bytes: reference.size_bytes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub status: &'static str,
    pub source_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SubmitResponse {
    pub fn from_outcome(uri: &DocumentUri, outcome: &SubmitOutcome) -> Self {
        let reason = match outcome {
            SubmitOutcome::Rejected { reason, .. } => Some(reason.clone()),
            SubmitOutcome::Accepted(_) | SubmitOutcome::Duplicate(_) => None,
        };
        Self {
            status: outcome.label(),
            source_uri: uri.to_string(),
            document: outcome.reference().map(DocumentStatus::from),
            reason,
        }
    }
}

/// Explicit ingestion of a document that is already in the bucket.
pub async fn ingest_document(
    State(state): State<ApiState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        ApiError::ValidationError(format!("Invalid request body: {}", rejection.body_text()))
    })?;
    let uri = DocumentUri::parse(&request.file_name, state.storage.bucket())?;

    info!(source_uri = %uri, "Received ingestion request");

    match state.coordinator.submit(&uri).await? {
        SubmitOutcome::Rejected { reason, .. } => Err(ApiError::NotFound(reason)),
        outcome => Ok(Json(SubmitResponse::from_outcome(&uri, &outcome))),
    }
}
