use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use common::{
    error::BackendError,
    utils::{config::AppConfig, gcp_auth::AccessTokenProvider},
};
use tracing::debug;

/// One chat turn sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Raw text of the model's answer. Empty output is returned as an empty string.
    async fn generate(&self, request: &ModelRequest) -> Result<String, BackendError>;
}

/// Chat-completions client for any OpenAI-compatible endpoint, Vertex AI's included.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleModel {
    base_url: String,
    api_key: Option<String>,
    tokens: AccessTokenProvider,
    model: String,
    temperature: f32,
}

impl OpenAiCompatibleModel {
    pub fn from_app_config(config: &AppConfig, tokens: AccessTokenProvider) -> Self {
        let base_url = config
            .openai_base_url
            .clone()
            .unwrap_or_else(|| vertex_base_url(&config.project_id, &config.vertex_region));

        Self {
            base_url,
            api_key: config.openai_api_key.clone(),
            tokens,
            model: config.model_name.clone(),
            temperature: config.model_temperature,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn client(&self) -> Result<Client<OpenAIConfig>, BackendError> {
        let key = match &self.api_key {
            Some(key) => key.clone(),
            None => self.tokens.token().await?,
        };
        Ok(Client::with_config(
            OpenAIConfig::new()
                .with_api_key(key)
                .with_api_base(&self.base_url),
        ))
    }
}

#[async_trait]
impl GenerativeModel for OpenAiCompatibleModel {
    async fn generate(&self, request: &ModelRequest) -> Result<String, BackendError> {
        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.temperature)
            .messages([
                ChatCompletionRequestSystemMessage::from(request.system.clone()).into(),
                ChatCompletionRequestUserMessage::from(request.user.clone()).into(),
            ])
            .build()
            .map_err(|e| BackendError::Permanent(format!("invalid chat request: {e}")))?;

        let response = self
            .client()
            .await?
            .chat()
            .create(chat_request)
            .await
            .map_err(classify_openai_error)?;

        debug!(
            model = %self.model,
            choices = response.choices.len(),
            "model responded"
        );

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

/// OpenAI-compatible endpoint Vertex AI serves for a project and region.
pub fn vertex_base_url(project_id: &str, region: &str) -> String {
    let host = if region == "global" {
        "aiplatform.googleapis.com".to_string()
    } else {
        format!("{region}-aiplatform.googleapis.com")
    };
    format!("https://{host}/v1beta1/projects/{project_id}/locations/{region}/endpoints/openapi")
}

const TRANSIENT_API_MARKERS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "quota",
    "resource_exhausted",
    "resource exhausted",
    "overloaded",
    "unavailable",
    "timeout",
    "timed out",
    "internal error",
    "try again",
];

pub fn classify_openai_error(err: OpenAIError) -> BackendError {
    match err {
        OpenAIError::Reqwest(inner) => {
            let permanent_status = inner.status().is_some_and(|status| {
                status.is_client_error()
                    && status.as_u16() != 408
                    && status.as_u16() != 429
            });
            if permanent_status {
                BackendError::Permanent(inner.to_string())
            } else {
                BackendError::Transient(inner.to_string())
            }
        }
        OpenAIError::ApiError(api) => {
            let haystack = format!(
                "{} {} {}",
                api.message,
                api.r#type.as_deref().unwrap_or_default(),
                api.code.as_deref().unwrap_or_default()
            )
            .to_lowercase();
            if TRANSIENT_API_MARKERS.iter().any(|m| haystack.contains(m)) {
                BackendError::Transient(api.message)
            } else {
                BackendError::Permanent(api.message)
            }
        }
        OpenAIError::JSONDeserialize(e) => {
            BackendError::Transient(format!("unreadable model response: {e}"))
        }
        OpenAIError::StreamError(message) => BackendError::Transient(message),
        other => BackendError::Permanent(other.to_string()),
    }
}
