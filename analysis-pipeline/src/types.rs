use std::time::Duration;

use common::error::{AppError, ErrorKind};
use retrieval_pipeline::Passage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AnalysisRequest {
    /// `gs://bucket/object` URI or a bare object name in the configured bucket.
    pub file_name: String,
    /// Optional focus narrowing the search query.
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Complete,
    #[default]
    Partial,
    Failed,
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::Complete => "complete",
            CompletionStatus::Partial => "partial",
            CompletionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub passage_id: String,
    pub document_id: String,
    pub source_uri: Option<String>,
    pub page: Option<u32>,
    pub score: f32,
}

impl From<&Passage> for Citation {
    fn from(passage: &Passage) -> Self {
        Self {
            passage_id: passage.passage_id.clone(),
            document_id: passage.document_id.clone(),
            source_uri: passage.source_uri.clone(),
            page: passage.page,
            score: passage.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub retry_after_secs: Option<u64>,
}

impl FailureInfo {
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_secs.map(Duration::from_secs)
    }
}

impl From<&AppError> for FailureInfo {
    fn from(err: &AppError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            retry_after_secs: err.retry_after().map(|d| d.as_secs()),
        }
    }
}

/// Structured study material for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub status: CompletionStatus,
    pub summary: String,
    pub topics: Vec<String>,
    pub learning_objectives: Vec<String>,
    pub citations: Vec<Citation>,
    /// Distinct source URIs behind the citations, in citation order.
    pub used_sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    pub model_attempts: u32,
    pub format_attempts: u32,
}

impl AnalysisResult {
    pub fn failed(failure: FailureInfo) -> Self {
        Self {
            status: CompletionStatus::Failed,
            failure: Some(failure),
            ..Self::default()
        }
    }

    /// Summary and topics are both present.
    pub fn has_required_fields(&self) -> bool {
        !self.summary.trim().is_empty() && !self.topics.is_empty()
    }

    /// Number of non-empty content sections, used to pick the best partial answer.
    pub fn filled_sections(&self) -> usize {
        usize::from(!self.summary.trim().is_empty())
            + usize::from(!self.topics.is_empty())
            + usize::from(!self.learning_objectives.is_empty())
    }

    pub fn with_citations(mut self, passages: &[Passage]) -> Self {
        self.citations = passages.iter().map(Citation::from).collect();
        self.used_sources = Vec::new();
        for uri in passages.iter().filter_map(|p| p.source_uri.as_ref()) {
            if !self.used_sources.contains(uri) {
                self.used_sources.push(uri.clone());
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(id: &str, uri: &str) -> Passage {
        Passage {
            passage_id: id.into(),
            document_id: "doc-1".into(),
            source_uri: Some(uri.into()),
            text: "text".into(),
            score: 0.5,
            page: Some(2),
        }
    }

    #[test]
    fn citations_keep_order_and_distinct_sources() {
        let result = AnalysisResult::default().with_citations(&[
            passage("a", "gs://b/BWS.pdf"),
            passage("b", "gs://b/BWS.pdf"),
            passage("c", "gs://b/VWL.pdf"),
        ]);

        assert_eq!(result.citations.len(), 3);
        assert_eq!(result.citations[0].page, Some(2));
        assert_eq!(result.used_sources, vec!["gs://b/BWS.pdf", "gs://b/VWL.pdf"]);
    }

    #[test]
    fn required_fields_need_summary_and_topics() {
        let mut result = AnalysisResult {
            summary: "  ".into(),
            topics: vec!["Markt".into()],
            ..Default::default()
        };
        assert!(!result.has_required_fields());
        assert_eq!(result.filled_sections(), 1);

        result.summary = "Kurzfassung".into();
        assert!(result.has_required_fields());
    }

    #[test]
    fn failure_serializes_with_stable_kind() {
        let err = AppError::TransientModel {
            message: "quota".into(),
            retry_after: Duration::from_secs(30),
        };
        let result = AnalysisResult::failed(FailureInfo::from(&err));
        let value = serde_json::to_value(&result).expect("serialize");

        assert_eq!(value["status"], "failed");
        assert_eq!(value["failure"]["kind"], "transient_model_error");
        assert_eq!(value["failure"]["retry_after_secs"], 30);
    }
}
