pub mod discovery_engine;
pub mod pipeline;
pub mod query;
pub mod scoring;

use async_trait::async_trait;
use common::error::BackendError;
use serde::{Deserialize, Serialize};

pub use pipeline::{config::SearchTuning, SearchClient, SearchOutcome};
pub use query::QueryContext;

/// Retrieved excerpt of an indexed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub passage_id: String,
    pub document_id: String,
    pub source_uri: Option<String>,
    pub text: String,
    pub score: f32,
    pub page: Option<u32>,
}

/// What gets submitted to the search backend. The backend pulls and parses the
/// referenced object itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub document_id: String,
    pub source_uri: String,
    pub fingerprint: String,
    pub mime_type: String,
}

/// Backend acknowledgement of an index write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexAck {
    /// Long-running operation handle, when the backend reports one.
    pub operation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub filter: Option<String>,
    pub top_k: usize,
}

/// Managed search index used by both the ingestion and the analysis paths.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn write_record(&self, record: &IndexRecord) -> Result<IndexAck, BackendError>;

    async fn search(&self, request: &SearchRequest) -> Result<Vec<Passage>, BackendError>;
}
