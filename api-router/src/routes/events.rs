use axum::{body::Bytes, extract::State, response::IntoResponse, Json};
use common::error::ErrorKind;
use ingestion_pipeline::{decode_event, DecodedEvent};
use serde_json::json;
use tracing::{info, warn};

use crate::{api_state::ApiState, error::ApiError, routes::ingest::SubmitResponse};

/// Storage notification endpoint.
///
/// A 2xx answer acknowledges the delivery. Malformed bodies get a 400; of the submission
/// failures only transient and internal ones are answered with an error status.
pub async fn storage_event(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let event = match decode_event(&body)? {
        DecodedEvent::Object(event) => event,
        DecodedEvent::Ignored(reason) => {
            info!(%reason, "Ignoring storage event");
            return Ok(Json(json!({ "status": "ignored", "reason": reason })));
        }
    };

    let uri = match event.document_uri(state.storage.bucket()) {
        Ok(uri) => uri,
        Err(err) => {
            warn!(bucket = %event.bucket, object = %event.object_name, error = %err, "Ignoring event for unserved object");
            return Ok(Json(json!({ "status": "ignored", "reason": err.to_string() })));
        }
    };

    info!(
        source_uri = %uri,
        reported_fingerprint = event.content_fingerprint.as_deref().unwrap_or("-"),
        "Received storage event"
    );

    match state.coordinator.submit(&uri).await {
        Ok(outcome) => Ok(Json(json!(SubmitResponse::from_outcome(&uri, &outcome)))),
        Err(err) if err.kind().is_transient() || err.kind() == ErrorKind::Internal => {
            Err(ApiError::from(err))
        }
        Err(err) => {
            warn!(source_uri = %uri, kind = err.kind().as_str(), error = %err, "Storage event not indexable");
            Ok(Json(json!({
                "status": "failed",
                "source_uri": uri.to_string(),
                "kind": err.kind(),
                "error": err.to_string(),
            })))
        }
    }
}
