use std::path::Path;

use axum::{body::Bytes, extract::State, response::IntoResponse, Json};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use common::{
    error::AppError, storage::document_uri::DocumentUri,
    utils::ingest_limits::validate_upload,
};
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::{api_state::ApiState, error::ApiError, routes::ingest::SubmitResponse};

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    #[form_data(limit = "104857600")]
    pub file: FieldData<NamedTempFile>,
}

/// Stores an uploaded PDF as `{date}_{name}.pdf` and submits it for indexing.
///
/// Indexing trouble does not fail the upload; it is reported under `ingestion`.
pub async fn upload_document(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    let file_name = input.file.metadata.file_name.clone().unwrap_or_default();
    let content_type = input.file.metadata.content_type.clone();
    let size_bytes = tokio::fs::metadata(input.file.contents.path())
        .await
        .map_err(AppError::from)?
        .len();

    info!(
        file_name = %file_name,
        content_type = content_type.as_deref().unwrap_or("-"),
        size_bytes,
        "Received upload"
    );

    validate_upload(&state.config, &file_name, content_type.as_deref(), size_bytes)?;

    let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let object_name = state
        .storage
        .unique_upload_name(&upload_stem(&file_name), &date)
        .await
        .map_err(AppError::from)?;

    let content = tokio::fs::read(input.file.contents.path())
        .await
        .map_err(AppError::from)?;
    state
        .storage
        .put(&object_name, Bytes::from(content))
        .await
        .map_err(AppError::from)?;

    let uri = DocumentUri::new(state.storage.bucket(), object_name.clone());
    info!(source_uri = %uri, "Stored upload");

    let ingestion = match state.coordinator.submit(&uri).await {
        Ok(outcome) => json!(SubmitResponse::from_outcome(&uri, &outcome)),
        Err(err) => {
            warn!(source_uri = %uri, kind = err.kind().as_str(), error = %err, "Upload stored but not indexed");
            ingestion_error(&err)
        }
    };

    Ok(Json(json!({
        "success": true,
        "filename": object_name,
        "gcs_path": uri.to_string(),
        "message": "File uploaded successfully.",
        "ingestion": ingestion,
    })))
}

fn ingestion_error(err: &AppError) -> Value {
    json!({
        "status": "error",
        "kind": err.kind(),
        "error": err.to_string(),
        "retry_after_secs": err.retry_after().map(|delay| delay.as_secs()),
    })
}

/// File name without its extension, with path separators flattened.
fn upload_stem(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let stem = Path::new(base)
        .file_stem()
        .map_or_else(|| base.to_string(), |stem| stem.to_string_lossy().into_owned());
    let stem = stem.trim();
    if stem.is_empty() {
        "upload".to_string()
    } else {
        stem.to_string()
    }
}
