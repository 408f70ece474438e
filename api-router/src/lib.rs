#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use routes::{
    analyze::analyze_document,
    events::storage_event,
    files::list_files,
    ingest::ingest_document,
    liveness::{health, live},
    readiness::ready,
    upload::upload_document,
};

pub mod api_state;
pub mod error;
mod routes;

/// Room for multipart boundaries and headers on top of the document itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

fn probe_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/health", get(health))
}

/// Every endpoint of the study companion: analysis, ingestion, uploads and probes.
pub fn api_routes<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    let upload_limit = app_state
        .config
        .max_document_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/analyze", post(analyze_document))
        .route("/ingest", post(ingest_document))
        .route("/events/storage", post(storage_event))
        .route(
            "/upload",
            post(upload_document).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/files", get(list_files))
        .route("/list-files", get(list_files))
        .merge(probe_routes())
}

/// Storage notifications and probes only, for a deployment that does nothing but index.
/// Push subscriptions may target either `/` or `/events/storage`.
pub fn indexer_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    Router::new()
        .route("/", post(storage_event))
        .route("/events/storage", post(storage_event))
        .merge(probe_routes())
}
