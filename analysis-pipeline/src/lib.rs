#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod model;
pub mod orchestrator;
pub mod parser;
pub mod pipeline;
pub mod prompt;
pub mod types;

pub use model::{GenerativeModel, ModelRequest, OpenAiCompatibleModel};
pub use orchestrator::{GenerationOrchestrator, GenerationTuning};
pub use pipeline::{AnalysisPipeline, AnalysisTuning};
pub use types::{AnalysisRequest, AnalysisResult, Citation, CompletionStatus, FailureInfo};
