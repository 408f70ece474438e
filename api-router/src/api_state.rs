use std::sync::Arc;

use analysis_pipeline::{
    AnalysisPipeline, AnalysisTuning, GenerationOrchestrator, GenerationTuning, GenerativeModel,
    OpenAiCompatibleModel,
};
use anyhow::Context;
use common::{
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::{config::AppConfig, gcp_auth::AccessTokenProvider},
};
use ingestion_pipeline::{IngestionCoordinator, IngestionTuning};
use retrieval_pipeline::{
    discovery_engine::{DiscoveryEngineClient, DiscoveryEngineSettings},
    SearchClient, SearchIndex, SearchTuning,
};
use tracing::info;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub storage: StorageManager,
    pub coordinator: Arc<IngestionCoordinator>,
    pub analysis: Arc<AnalysisPipeline>,
}

impl ApiState {
    /// Connects the registry, the bucket and the Google backends named in `config`.
    ///
    /// Missing data store identifiers fail here rather than on the first request.
    pub async fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let surreal_db_client = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await
            .with_context(|| format!("connecting to registry at {}", config.surrealdb_address))?,
        );

        surreal_db_client
            .ensure_initialized()
            .await
            .context("initializing document registry")?;

        let storage = StorageManager::new(config)
            .await
            .with_context(|| format!("opening bucket {}", config.gcs_bucket_name))?;

        let http = reqwest::Client::new();
        let tokens = AccessTokenProvider::from_config(config, http.clone());

        let settings = DiscoveryEngineSettings::from_app_config(config)
            .context("invalid search backend configuration")?;
        info!(
            data_store = %settings.data_store,
            host = %settings.host,
            "Search backend configured"
        );
        let index: Arc<dyn SearchIndex> =
            Arc::new(DiscoveryEngineClient::new(http, tokens.clone(), settings));

        let model = OpenAiCompatibleModel::from_app_config(config, tokens);
        info!(base_url = model.base_url(), model = %config.model_name, "Model endpoint configured");

        Ok(Self::with_services(
            surreal_db_client,
            config.clone(),
            storage,
            index,
            Arc::new(model),
        ))
    }

    /// Wires both pipelines around already constructed backends.
    pub fn with_services(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        storage: StorageManager,
        index: Arc<dyn SearchIndex>,
        model: Arc<dyn GenerativeModel>,
    ) -> Self {
        let coordinator = IngestionCoordinator::new(
            Arc::clone(&db),
            storage.clone(),
            Arc::clone(&index),
            IngestionTuning::from_app_config(&config),
        );

        let search = SearchClient::new(index, SearchTuning::from_app_config(&config));
        let orchestrator =
            GenerationOrchestrator::new(model, GenerationTuning::from_app_config(&config));
        let analysis = AnalysisPipeline::new(
            Arc::clone(&db),
            storage.clone(),
            search,
            orchestrator,
            AnalysisTuning::from_app_config(&config),
        );

        Self {
            db,
            config,
            storage,
            coordinator: Arc::new(coordinator),
            analysis: Arc::new(analysis),
        }
    }
}
