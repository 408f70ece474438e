use analysis_pipeline::{AnalysisRequest, CompletionStatus};
use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

pub async fn analyze_document(
    State(state): State<ApiState>,
    payload: Result<Json<AnalysisRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        ApiError::ValidationError(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    info!(
        file_name = %request.file_name,
        has_scope = request.scope.is_some(),
        "Received analysis request"
    );

    let result = state.analysis.analyze(&request).await?;

    if result.status == CompletionStatus::Failed {
        if let Some(failure) = &result.failure {
            return Err(ApiError::from_failure(failure));
        }
    }

    Ok(Json(result))
}
