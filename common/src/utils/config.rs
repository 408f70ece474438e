use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use super::retry::RetryPolicy;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
    Gcs,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Gcs
}

/// Heading aliases recognised when splitting model output into sections.
///
/// The first alias of each list is the canonical heading used in prompts.
#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
pub struct SectionMarkers {
    #[serde(default = "default_summary_markers")]
    pub summary: Vec<String>,
    #[serde(default = "default_topic_markers")]
    pub topics: Vec<String>,
    #[serde(default = "default_objective_markers")]
    pub learning_objectives: Vec<String>,
}

impl Default for SectionMarkers {
    fn default() -> Self {
        Self {
            summary: default_summary_markers(),
            topics: default_topic_markers(),
            learning_objectives: default_objective_markers(),
        }
    }
}

fn default_summary_markers() -> Vec<String> {
    vec!["Summary".into(), "Zusammenfassung".into(), "Overview".into()]
}

fn default_topic_markers() -> Vec<String> {
    vec![
        "Topics".into(),
        "Thematische Übersicht".into(),
        "Topic Overview".into(),
        "Key Topics".into(),
        "Themen".into(),
    ]
}

fn default_objective_markers() -> Vec<String> {
    vec![
        "Learning Objectives".into(),
        "Lernziele".into(),
        "Objectives".into(),
        "Learning Goals".into(),
    ]
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_http_port", alias = "port")]
    pub http_port: u16,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_bucket_name")]
    pub gcs_bucket_name: String,

    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub data_store_id: String,
    #[serde(default = "default_data_store_location")]
    pub data_store_location: String,
    #[serde(default = "default_serving_config_id")]
    pub serving_config_id: String,
    #[serde(default = "default_vertex_region")]
    pub vertex_region: String,
    #[serde(default)]
    pub gcp_access_token: Option<String>,

    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_model_temperature")]
    pub model_temperature: f32,
    #[serde(default)]
    pub openai_base_url: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub section_markers: SectionMarkers,

    #[serde(default = "default_surrealdb_address")]
    pub surrealdb_address: String,
    #[serde(default)]
    pub surrealdb_username: String,
    #[serde(default)]
    pub surrealdb_password: String,
    #[serde(default = "default_surrealdb_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_surrealdb_database")]
    pub surrealdb_database: String,

    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: usize,
    #[serde(default = "default_extractive_segments")]
    pub extractive_segments: usize,
    #[serde(default = "default_search_filter_field")]
    pub search_filter_field: String,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_min_passage_chars")]
    pub min_passage_chars: usize,

    #[serde(default = "default_request_deadline_secs")]
    pub request_deadline_secs: u64,
    #[serde(default = "default_storage_timeout_secs")]
    pub storage_timeout_secs: u64,
    #[serde(default = "default_search_timeout_secs")]
    pub search_timeout_secs: u64,
    #[serde(default = "default_index_timeout_secs")]
    pub index_timeout_secs: u64,
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    #[serde(default = "default_attempts")]
    pub storage_attempts: usize,
    #[serde(default = "default_attempts")]
    pub search_attempts: usize,
    #[serde(default = "default_attempts")]
    pub indexing_attempts: usize,
    #[serde(default = "default_attempts")]
    pub model_attempts: usize,
    #[serde(default = "default_format_retries")]
    pub format_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,

    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
    #[serde(default = "default_submission_lease_secs")]
    pub submission_lease_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            storage: default_storage_kind(),
            data_dir: default_data_dir(),
            gcs_bucket_name: default_bucket_name(),
            project_id: String::new(),
            data_store_id: String::new(),
            data_store_location: default_data_store_location(),
            serving_config_id: default_serving_config_id(),
            vertex_region: default_vertex_region(),
            gcp_access_token: None,
            model_name: default_model_name(),
            model_temperature: default_model_temperature(),
            openai_base_url: None,
            openai_api_key: None,
            system_prompt: None,
            section_markers: SectionMarkers::default(),
            surrealdb_address: default_surrealdb_address(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: default_surrealdb_namespace(),
            surrealdb_database: default_surrealdb_database(),
            retrieval_top_k: default_retrieval_top_k(),
            extractive_segments: default_extractive_segments(),
            search_filter_field: default_search_filter_field(),
            max_context_chars: default_max_context_chars(),
            min_passage_chars: default_min_passage_chars(),
            request_deadline_secs: default_request_deadline_secs(),
            storage_timeout_secs: default_storage_timeout_secs(),
            search_timeout_secs: default_search_timeout_secs(),
            index_timeout_secs: default_index_timeout_secs(),
            model_timeout_secs: default_model_timeout_secs(),
            storage_attempts: default_attempts(),
            search_attempts: default_attempts(),
            indexing_attempts: default_attempts(),
            model_attempts: default_attempts(),
            format_retries: default_format_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_after_secs: default_retry_after_secs(),
            max_document_bytes: default_max_document_bytes(),
            submission_lease_secs: default_submission_lease_secs(),
        }
    }
}

impl AppConfig {
    /// Retry policy for an outbound dependency with the given attempt budget.
    pub fn retry_policy(&self, max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
        .with_retry_after(Duration::from_secs(self.retry_after_secs))
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_secs)
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_bucket_name() -> String {
    "ai-study-companion-bucket".to_string()
}

fn default_data_store_location() -> String {
    "global".to_string()
}

fn default_serving_config_id() -> String {
    "default_search".to_string()
}

fn default_vertex_region() -> String {
    "europe-west1".to_string()
}

fn default_model_name() -> String {
    "google/gemini-2.0-flash".to_string()
}

fn default_model_temperature() -> f32 {
    0.2
}

fn default_surrealdb_address() -> String {
    "mem://".to_string()
}

fn default_surrealdb_namespace() -> String {
    "study_companion".to_string()
}

fn default_surrealdb_database() -> String {
    "registry".to_string()
}

fn default_retrieval_top_k() -> usize {
    8
}

fn default_extractive_segments() -> usize {
    3
}

fn default_search_filter_field() -> String {
    "source_uri".to_string()
}

fn default_max_context_chars() -> usize {
    24_000
}

fn default_min_passage_chars() -> usize {
    200
}

fn default_request_deadline_secs() -> u64 {
    120
}

fn default_storage_timeout_secs() -> u64 {
    10
}

fn default_search_timeout_secs() -> u64 {
    15
}

fn default_index_timeout_secs() -> u64 {
    30
}

fn default_model_timeout_secs() -> u64 {
    60
}

fn default_attempts() -> usize {
    3
}

fn default_format_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    250
}

fn default_retry_max_delay_ms() -> u64 {
    4_000
}

fn default_retry_after_secs() -> u64 {
    30
}

fn default_max_document_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_submission_lease_secs() -> u64 {
    300
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
