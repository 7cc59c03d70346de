use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use storage::Source;
use thiserror::Error;

/// Core-level error kinds (spec §7). Each downstream call is mapped into
/// one of these; `ask` only ever returns the terminal ones.
#[derive(Debug, Clone, Error)]
pub enum PipelineErrorKind {
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("embedding failure: {0}")]
    EmbeddingFailure(String),
    #[error("vector search failure: {0}")]
    VectorSearchFailure(String),
    #[error("generation failure: {0}")]
    GenerationFailure(String),
    #[error("storage failure: {0}")]
    StorageFailure(String),
    #[error("degraded answer: {0}")]
    DegradedAnswer(String),
    #[error("deadline exceeded")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    VectorHit,
    Generated,
    VectorFallback,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineDecision {
    pub answer: String,
    pub confidence: f32,
    pub source_tag: SourceTag,
    pub steps: Vec<String>,
    pub elapsed_ms: u64,
    pub metadata: JsonValue,
}

/// One row of `find_similar`'s result (spec §6).
#[derive(Debug, Clone, Serialize)]
pub struct SimilarMatch {
    pub question: String,
    pub answer: String,
    pub score: f32,
    pub confidence: f32,
    pub source: Source,
    pub created_at: DateTime<Utc>,
}
