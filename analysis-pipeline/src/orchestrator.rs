use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use common::{
    error::{AppError, BackendError},
    utils::{
        config::{AppConfig, SectionMarkers},
        retry::{retry_transient, RetryPolicy},
    },
};
use retrieval_pipeline::{Passage, QueryContext};
use tracing::{info, instrument, warn};

use crate::{
    model::{GenerativeModel, ModelRequest},
    parser::parse_with_markers,
    prompt::{build_prompt, stricter_instruction, PromptBudget, DEFAULT_SYSTEM_PROMPT},
    types::{AnalysisResult, CompletionStatus, FailureInfo},
};

#[derive(Debug, Clone)]
pub struct GenerationTuning {
    pub system_prompt: String,
    pub markers: SectionMarkers,
    pub budget: PromptBudget,
    pub model_timeout: Duration,
    pub model_retry: RetryPolicy,
    /// Re-asks with a stricter formatting instruction after unparseable output.
    pub format_retries: u32,
}

impl Default for GenerationTuning {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            markers: SectionMarkers::default(),
            budget: PromptBudget::default(),
            model_timeout: Duration::from_secs(60),
            model_retry: RetryPolicy::default(),
            format_retries: 2,
        }
    }
}

impl GenerationTuning {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            system_prompt: config
                .system_prompt
                .clone()
                .filter(|prompt| !prompt.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            markers: config.section_markers.clone(),
            budget: PromptBudget {
                max_context_chars: config.max_context_chars,
                min_passage_chars: config.min_passage_chars,
            },
            model_timeout: Duration::from_secs(config.model_timeout_secs),
            model_retry: config.retry_policy(config.model_attempts),
            format_retries: config.format_retries,
        }
    }
}

/// Prompts the model with retrieved passages and validates what comes back.
pub struct GenerationOrchestrator {
    model: Arc<dyn GenerativeModel>,
    tuning: GenerationTuning,
}

impl GenerationOrchestrator {
    pub fn new(model: Arc<dyn GenerativeModel>, tuning: GenerationTuning) -> Self {
        Self { model, tuning }
    }

    pub fn tuning(&self) -> &GenerationTuning {
        &self.tuning
    }

    /// Never fails outright: model exhaustion is reported as a `Failed` result, unparseable
    /// output as `Partial` with the best fields salvaged.
    #[instrument(skip_all, fields(source_uri = %target.source_uri, passages = passages.len()))]
    pub async fn analyze(&self, target: &QueryContext, passages: &[Passage]) -> AnalysisResult {
        let prompt = build_prompt(
            &self.tuning.system_prompt,
            target,
            passages,
            &self.tuning.budget,
            &self.tuning.markers,
        );
        let model_attempts = AtomicU32::new(0);
        let mut best: Option<AnalysisResult> = None;
        let mut format_attempts = 0u32;

        for format_retry in 0..=self.tuning.format_retries {
            let user = if format_retry == 0 {
                prompt.user.clone()
            } else {
                format!(
                    "{}\n\n{}",
                    prompt.user,
                    stricter_instruction(format_retry, &self.tuning.markers)
                )
            };
            let request = ModelRequest {
                system: prompt.system.clone(),
                user,
            };

            let raw = match self.call_model(&request, &model_attempts).await {
                Ok(raw) => raw,
                Err(err) => {
                    let failure = self.model_failure(err);
                    let attempts = model_attempts.load(Ordering::SeqCst);
                    return match best {
                        Some(salvaged) if salvaged.filled_sections() > 0 => {
                            warn!(
                                kind = failure.kind.as_str(),
                                "model unavailable, returning salvaged partial answer"
                            );
                            finish(
                                salvaged,
                                CompletionStatus::Partial,
                                &prompt.included,
                                attempts,
                                format_attempts,
                            )
                        }
                        _ => {
                            warn!(
                                kind = failure.kind.as_str(),
                                error = %failure.message,
                                "model call failed"
                            );
                            let mut failed = AnalysisResult::failed(failure);
                            failed.model_attempts = attempts;
                            failed.format_attempts = format_attempts;
                            failed
                        }
                    };
                }
            };

            format_attempts += 1;
            let (parsed, ok) = parse_with_markers(&raw, &self.tuning.markers);
            if ok {
                let attempts = model_attempts.load(Ordering::SeqCst);
                info!(
                    model_attempts = attempts,
                    format_attempts,
                    topics = parsed.topics.len(),
                    "analysis complete"
                );
                return finish(
                    parsed,
                    CompletionStatus::Complete,
                    &prompt.included,
                    attempts,
                    format_attempts,
                );
            }

            warn!(
                format_attempt = format_attempts,
                filled_sections = parsed.filled_sections(),
                "model output failed validation"
            );
            best = match best {
                Some(previous) if previous.filled_sections() >= parsed.filled_sections() => {
                    Some(previous)
                }
                _ => Some(parsed),
            };
        }

        let attempts = model_attempts.load(Ordering::SeqCst);
        warn!(format_attempts, "format retries exhausted, returning partial answer");
        finish(
            best.unwrap_or_default(),
            CompletionStatus::Partial,
            &prompt.included,
            attempts,
            format_attempts,
        )
    }

    async fn call_model(
        &self,
        request: &ModelRequest,
        attempts: &AtomicU32,
    ) -> Result<String, BackendError> {
        let model = &self.model;
        let timeout = self.tuning.model_timeout;

        retry_transient(&self.tuning.model_retry, "model", move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::timeout(timeout, model.generate(request))
                .await
                .map_err(|_| {
                    BackendError::Transient(format!(
                        "model call timed out after {}s",
                        timeout.as_secs()
                    ))
                })?
        })
        .await
    }

    fn model_failure(&self, err: BackendError) -> FailureInfo {
        let app_error = match err {
            BackendError::Transient(message) => AppError::TransientModel {
                message,
                retry_after: self.tuning.model_retry.retry_after,
            },
            BackendError::Permanent(message) | BackendError::NotFound(message) => {
                AppError::Backend(format!("model rejected the request: {message}"))
            }
        };
        FailureInfo::from(&app_error)
    }
}

fn finish(
    result: AnalysisResult,
    status: CompletionStatus,
    included: &[Passage],
    model_attempts: u32,
    format_attempts: u32,
) -> AnalysisResult {
    AnalysisResult {
        status,
        failure: None,
        model_attempts,
        format_attempts,
        ..result.with_citations(included)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{error::ErrorKind, storage::document_uri::DocumentUri};
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    const GOOD: &str = "## Summary\nKosten im Betrieb.\n## Topics\n- Fixkosten\n## Learning Objectives\n- Kosten trennen";

    struct ScriptedModel {
        responses: Mutex<VecDeque<Result<String, BackendError>>>,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Result<String, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GenerativeModel for ScriptedModel {
        async fn generate(&self, request: &ModelRequest) -> Result<String, BackendError> {
            self.requests.lock().await.push(request.clone());
            self.responses
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::Permanent("script exhausted".into())))
        }
    }

    fn tuning() -> GenerationTuning {
        GenerationTuning {
            model_timeout: Duration::from_millis(100),
            model_retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2))
                .with_retry_after(Duration::from_secs(20)),
            ..GenerationTuning::default()
        }
    }

    fn target() -> QueryContext {
        QueryContext::for_document(&DocumentUri::new("b", "BWS.pdf"), None, "source_uri", &[])
    }

    fn passages() -> Vec<Passage> {
        vec![Passage {
            passage_id: "doc-1#seg-0".into(),
            document_id: "doc-1".into(),
            source_uri: Some("gs://b/BWS.pdf".into()),
            text: "Fixkosten fallen unabhängig von der Menge an.".into(),
            score: 0.8,
            page: Some(4),
        }]
    }

    #[tokio::test]
    async fn good_output_is_complete_with_citations() {
        let model = ScriptedModel::new(vec![Ok(GOOD.into())]);
        let orchestrator = GenerationOrchestrator::new(model.clone(), tuning());

        let result = orchestrator.analyze(&target(), &passages()).await;

        assert_eq!(result.status, CompletionStatus::Complete);
        assert_eq!(result.citations.len(), 1);
        assert_eq!(result.used_sources, vec!["gs://b/BWS.pdf"]);
        assert_eq!(result.model_attempts, 1);
        assert_eq!(result.format_attempts, 1);
    }

    #[tokio::test]
    async fn transient_model_errors_are_retried() {
        let model = ScriptedModel::new(vec![
            Err(BackendError::Transient("429".into())),
            Ok(GOOD.into()),
        ]);
        let orchestrator = GenerationOrchestrator::new(model, tuning());

        let result = orchestrator.analyze(&target(), &passages()).await;

        assert_eq!(result.status, CompletionStatus::Complete);
        assert_eq!(result.model_attempts, 2);
    }

    #[tokio::test]
    async fn exhausted_model_is_failed_with_retry_hint() {
        let model = ScriptedModel::new(vec![
            Err(BackendError::Transient("503".into())),
            Err(BackendError::Transient("503".into())),
        ]);
        let orchestrator = GenerationOrchestrator::new(model, tuning());

        let result = orchestrator.analyze(&target(), &passages()).await;

        assert_eq!(result.status, CompletionStatus::Failed);
        let failure = result.failure.expect("failure info");
        assert_eq!(failure.kind, ErrorKind::TransientModel);
        assert_eq!(failure.retry_after_secs, Some(20));
        assert!(result.citations.is_empty());
    }

    #[tokio::test]
    async fn permanent_model_error_is_not_retried() {
        let model = ScriptedModel::new(vec![Err(BackendError::Permanent("403".into()))]);
        let orchestrator = GenerationOrchestrator::new(model.clone(), tuning());

        let result = orchestrator.analyze(&target(), &passages()).await;

        assert_eq!(result.status, CompletionStatus::Failed);
        assert_eq!(result.failure.map(|f| f.kind), Some(ErrorKind::Backend));
        assert_eq!(model.requests.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn salvaged_answer_survives_later_model_outage() {
        let model = ScriptedModel::new(vec![
            Ok("Nur eine Zusammenfassung ohne Themen.".into()),
            Err(BackendError::Transient("503".into())),
            Err(BackendError::Transient("503".into())),
        ]);
        let orchestrator = GenerationOrchestrator::new(model, tuning());

        let result = orchestrator.analyze(&target(), &passages()).await;

        assert_eq!(result.status, CompletionStatus::Partial);
        assert_eq!(result.summary, "Nur eine Zusammenfassung ohne Themen.");
        assert!(result.failure.is_none());
    }

    #[tokio::test]
    async fn format_retries_use_stricter_prompt() {
        let model = ScriptedModel::new(vec![Ok("???".into()), Ok(GOOD.into())]);
        let orchestrator = GenerationOrchestrator::new(model.clone(), tuning());

        let result = orchestrator.analyze(&target(), &passages()).await;

        assert_eq!(result.status, CompletionStatus::Complete);
        assert_eq!(result.format_attempts, 2);
        let requests = model.requests.lock().await;
        assert!(!requests[0].user.contains("could not be read"));
        assert!(requests[1].user.contains("could not be read"));
    }
}
