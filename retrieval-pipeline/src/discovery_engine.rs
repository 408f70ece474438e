use async_trait::async_trait;
use common::{
    error::{AppError, BackendError},
    utils::{config::AppConfig, gcp_auth::AccessTokenProvider},
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::{
    scoring::rank_fallback_score, IndexAck, IndexRecord, Passage, SearchIndex, SearchRequest,
};

const GLOBAL_HOST: &str = "discoveryengine.googleapis.com";
const DEFAULT_BRANCH: &str = "default_branch";

/// Full data store resource name. Ids that already are resource names are kept as is.
pub fn data_store_resource_name(project_id: &str, location: &str, data_store_id: &str) -> String {
    if data_store_id.starts_with("projects/") {
        return data_store_id.to_string();
    }
    format!(
        "projects/{project_id}/locations/{location}/collections/default_collection/dataStores/{data_store_id}"
    )
}

/// API endpoint host for a data store location.
pub fn api_host(location: &str) -> String {
    if location.is_empty() || location == "global" {
        GLOBAL_HOST.to_string()
    } else {
        format!("{location}-{GLOBAL_HOST}")
    }
}

fn location_of(resource_name: &str) -> Option<&str> {
    let mut segments = resource_name.split('/');
    while let Some(segment) = segments.next() {
        if segment == "locations" {
            return segments.next();
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEngineSettings {
    pub host: String,
    pub data_store: String,
    pub serving_config: String,
    pub extractive_segments: usize,
}

impl DiscoveryEngineSettings {
    pub fn from_app_config(config: &AppConfig) -> Result<Self, AppError> {
        let data_store_id = config.data_store_id.trim();
        if data_store_id.is_empty() {
            return Err(AppError::Validation(
                "Missing DATA_STORE_ID configuration".to_string(),
            ));
        }
        if !data_store_id.starts_with("projects/") && config.project_id.trim().is_empty() {
            return Err(AppError::Validation(
                "Missing PROJECT_ID configuration".to_string(),
            ));
        }

        let data_store = data_store_resource_name(
            config.project_id.trim(),
            config.data_store_location.trim(),
            data_store_id,
        );
        let location = location_of(&data_store).unwrap_or(config.data_store_location.trim());

        Ok(Self {
            host: api_host(location),
            serving_config: config.serving_config_id.clone(),
            extractive_segments: config.extractive_segments.max(1),
            data_store,
        })
    }

    pub fn import_url(&self) -> String {
        format!(
            "https://{}/v1/{}/branches/{DEFAULT_BRANCH}/documents:import",
            self.host, self.data_store
        )
    }

    pub fn search_url(&self) -> String {
        format!(
            "https://{}/v1/{}/servingConfigs/{}:search",
            self.host, self.data_store, self.serving_config
        )
    }
}

/// Vertex AI Search (Discovery Engine) over its REST API.
#[derive(Debug, Clone)]
pub struct DiscoveryEngineClient {
    http: reqwest::Client,
    tokens: AccessTokenProvider,
    settings: DiscoveryEngineSettings,
}

impl DiscoveryEngineClient {
    pub fn new(
        http: reqwest::Client,
        tokens: AccessTokenProvider,
        settings: DiscoveryEngineSettings,
    ) -> Self {
        Self {
            http,
            tokens,
            settings,
        }
    }
}

#[async_trait]
impl SearchIndex for DiscoveryEngineClient {
    #[instrument(skip_all, fields(document_id = %record.document_id))]
    async fn write_record(&self, record: &IndexRecord) -> Result<IndexAck, BackendError> {
        let token = self.tokens.token().await?;
        let body = import_body(record);

        let response = self
            .http
            .post(self.settings.import_url())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let operation: Operation = decode_response(response).await?;
        if let Some(error) = operation.error {
            return Err(BackendError::Permanent(format!(
                "import rejected ({}): {}",
                error.code, error.message
            )));
        }

        debug!(operation = ?operation.name, "Import accepted");
        Ok(IndexAck {
            operation: operation.name,
        })
    }

    #[instrument(skip_all)]
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Passage>, BackendError> {
        let token = self.tokens.token().await?;
        let body = SearchBody {
            query: &request.query,
            page_size: request.top_k,
            filter: request.filter.as_deref(),
            content_search_spec: ContentSearchSpec {
                extractive_content_spec: ExtractiveContentSpec {
                    max_extractive_segment_count: self.settings.extractive_segments,
                    return_extractive_segment_score: true,
                },
                snippet_spec: SnippetSpec {
                    return_snippet: true,
                },
            },
        };

        let response = self
            .http
            .post(self.settings.search_url())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let parsed: SearchResponse = decode_response(response).await?;
        Ok(passages_from_response(parsed))
    }
}

fn import_body(record: &IndexRecord) -> Value {
    json!({
        "inlineSource": {
            "documents": [{
                "id": record.document_id,
                "structData": {
                    "source_uri": record.source_uri,
                    "fingerprint": record.fingerprint,
                },
                "content": {
                    "mimeType": record.mime_type,
                    "uri": record.source_uri,
                },
            }],
        },
        "reconciliationMode": "INCREMENTAL",
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchBody<'a> {
    query: &'a str,
    page_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a str>,
    content_search_spec: ContentSearchSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentSearchSpec {
    extractive_content_spec: ExtractiveContentSpec,
    snippet_spec: SnippetSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtractiveContentSpec {
    max_extractive_segment_count: usize,
    return_extractive_segment_score: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SnippetSpec {
    return_snippet: bool,
}

#[derive(Debug, Deserialize)]
struct Operation {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    id: String,
    #[serde(default)]
    document: Option<SearchDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchDocument {
    #[serde(default)]
    id: String,
    #[serde(default)]
    struct_data: Option<Value>,
    #[serde(default)]
    derived_struct_data: Option<DerivedStructData>,
}

#[derive(Debug, Default, Deserialize)]
struct DerivedStructData {
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    extractive_segments: Vec<ExtractiveSegment>,
    #[serde(default)]
    snippets: Vec<Snippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractiveSegment {
    #[serde(default)]
    content: String,
    #[serde(default)]
    relevance_score: Option<f32>,
    #[serde(default)]
    page_number: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    #[serde(default)]
    snippet: String,
}

fn passages_from_response(response: SearchResponse) -> Vec<Passage> {
    let mut passages = Vec::new();
    let mut rank = 0usize;

    for result in response.results {
        let Some(document) = result.document else {
            continue;
        };
        let document_id = if document.id.is_empty() {
            result.id
        } else {
            document.id
        };
        let derived = document.derived_struct_data.unwrap_or_default();
        let source_uri = document
            .struct_data
            .as_ref()
            .and_then(|data| data.get("source_uri"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(derived.link);

        let mut produced = false;
        for (idx, segment) in derived.extractive_segments.into_iter().enumerate() {
            let text = segment.content.trim().to_string();
            if text.is_empty() {
                continue;
            }
            passages.push(Passage {
                passage_id: format!("{document_id}#seg-{idx}"),
                document_id: document_id.clone(),
                source_uri: source_uri.clone(),
                text,
                score: segment
                    .relevance_score
                    .unwrap_or_else(|| rank_fallback_score(rank)),
                page: segment.page_number.as_ref().and_then(parse_page),
            });
            rank += 1;
            produced = true;
        }

        if produced {
            continue;
        }

        for (idx, snippet) in derived.snippets.into_iter().enumerate() {
            let text = clean_snippet(&snippet.snippet);
            if text.is_empty() {
                continue;
            }
            passages.push(Passage {
                passage_id: format!("{document_id}#snip-{idx}"),
                document_id: document_id.clone(),
                source_uri: source_uri.clone(),
                text,
                score: rank_fallback_score(rank),
                page: None,
            });
            rank += 1;
        }
    }

    passages
}

fn parse_page(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn clean_snippet(raw: &str) -> String {
    raw.replace("<b>", "")
        .replace("</b>", "")
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

fn transport_error(err: reqwest::Error) -> BackendError {
    if err.is_decode() || err.is_builder() {
        BackendError::Permanent(err.to_string())
    } else {
        BackendError::Transient(err.to_string())
    }
}

/// Map an HTTP status from the API to the retry classification.
pub fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let message = format!("{status}: {}", body.chars().take(512).collect::<String>());
    match status {
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS
        | StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => BackendError::Transient(message),
        StatusCode::NOT_FOUND => BackendError::NotFound(message),
        _ => BackendError::Permanent(message),
    }
}

async fn decode_response<T>(response: reqwest::Response) -> Result<T, BackendError>
where
    T: for<'de> Deserialize<'de>,
{
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &body));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| BackendError::Permanent(format!("unexpected response payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_name_is_built_or_kept() {
        assert_eq!(
            data_store_resource_name("proj", "global", "course-docs"),
            "projects/proj/locations/global/collections/default_collection/dataStores/course-docs"
        );
        let full = "projects/p/locations/eu/collections/default_collection/dataStores/ds";
        assert_eq!(data_store_resource_name("ignored", "global", full), full);
    }

    #[test]
    fn host_depends_on_location() {
        assert_eq!(api_host("global"), "discoveryengine.googleapis.com");
        assert_eq!(api_host("eu"), "eu-discoveryengine.googleapis.com");
    }

    #[test]
    fn settings_require_data_store_and_project() {
        let missing_store = AppConfig {
            project_id: "proj".into(),
            ..Default::default()
        };
        assert!(matches!(
            DiscoveryEngineSettings::from_app_config(&missing_store),
            Err(AppError::Validation(_))
        ));

        let missing_project = AppConfig {
            data_store_id: "ds".into(),
            ..Default::default()
        };
        assert!(matches!(
            DiscoveryEngineSettings::from_app_config(&missing_project),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn settings_take_location_from_full_resource_name() {
        let config = AppConfig {
            data_store_id: "projects/p/locations/eu/collections/default_collection/dataStores/ds"
                .into(),
            ..Default::default()
        };
        let settings = DiscoveryEngineSettings::from_app_config(&config).expect("settings");

        assert_eq!(settings.host, "eu-discoveryengine.googleapis.com");
        assert_eq!(
            settings.import_url(),
            "https://eu-discoveryengine.googleapis.com/v1/projects/p/locations/eu/collections/default_collection/dataStores/ds/branches/default_branch/documents:import"
        );
        assert_eq!(
            settings.search_url(),
            "https://eu-discoveryengine.googleapis.com/v1/projects/p/locations/eu/collections/default_collection/dataStores/ds/servingConfigs/default_search:search"
        );
    }

    #[test]
    fn import_body_references_object_incrementally() {
        let body = import_body(&IndexRecord {
            document_id: "doc-abc".into(),
            source_uri: "gs://bucket/BWS.pdf".into(),
            fingerprint: "abc".into(),
            mime_type: "application/pdf".into(),
        });

        assert_eq!(body["reconciliationMode"], "INCREMENTAL");
        let doc = &body["inlineSource"]["documents"][0];
        assert_eq!(doc["id"], "doc-abc");
        assert_eq!(doc["content"]["uri"], "gs://bucket/BWS.pdf");
        assert_eq!(doc["structData"]["fingerprint"], "abc");
    }

    #[test]
    fn parses_extractive_segments_and_snippet_fallback() {
        let raw = json!({
            "results": [
                {
                    "id": "doc-1",
                    "document": {
                        "id": "doc-1",
                        "structData": {"source_uri": "gs://bucket/BWS.pdf"},
                        "derivedStructData": {
                            "link": "gs://bucket/BWS.pdf",
                            "extractive_segments": [
                                {"content": "Angebot und Nachfrage", "relevanceScore": 0.91, "pageNumber": "3"},
                                {"content": "   ", "relevanceScore": 0.5}
                            ]
                        }
                    }
                },
                {
                    "id": "doc-2",
                    "document": {
                        "id": "doc-2",
                        "derivedStructData": {
                            "link": "gs://bucket/VWL.pdf",
                            "snippets": [{"snippet": "Der <b>Markt</b> &amp; Preis"}]
                        }
                    }
                },
                {"id": "doc-3"}
            ]
        });
        let response: SearchResponse = serde_json::from_value(raw).expect("response");
        let passages = passages_from_response(response);

        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].passage_id, "doc-1#seg-0");
        assert_eq!(passages[0].page, Some(3));
        assert!((passages[0].score - 0.91).abs() < f32::EPSILON);
        assert_eq!(passages[0].source_uri.as_deref(), Some("gs://bucket/BWS.pdf"));

        assert_eq!(passages[1].passage_id, "doc-2#snip-0");
        assert_eq!(passages[1].text, "Der Markt & Preis");
        assert_eq!(passages[1].source_uri.as_deref(), Some("gs://bucket/VWL.pdf"));
    }

    #[test]
    fn empty_response_has_no_passages() {
        let response: SearchResponse = serde_json::from_str("{}").expect("response");
        assert!(passages_from_response(response).is_empty());
    }

    #[test]
    fn status_classification() {
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(!classify_status(StatusCode::FORBIDDEN, "denied").is_transient());
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, ""),
            BackendError::NotFound(_)
        ));
    }
}
