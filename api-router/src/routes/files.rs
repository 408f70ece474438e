use axum::{extract::State, response::IntoResponse, Json};
use common::error::AppError;
use serde::Serialize;
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Serialize)]
pub struct StoredFile {
    pub name: String,
    pub gs_path: String,
    pub size: u64,
    pub created: String,
}

/// PDFs in the bucket, newest first.
pub async fn list_files(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let objects = state.storage.list(None).await.map_err(AppError::from)?;

    let mut pdfs: Vec<_> = objects
        .into_iter()
        .filter(|meta| meta.location.as_ref().to_ascii_lowercase().ends_with(".pdf"))
        .collect();
    pdfs.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

    let bucket = state.storage.bucket();
    let files: Vec<StoredFile> = pdfs
        .into_iter()
        .map(|meta| {
            let name = meta.location.to_string();
            StoredFile {
                gs_path: format!("gs://{bucket}/{name}"),
                size: u64::try_from(meta.size).unwrap_or(u64::MAX),
                created: meta.last_modified.to_rfc3339(),
                name,
            }
        })
        .collect();

    Ok(Json(json!({ "files": files })))
}
