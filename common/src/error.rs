use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Transport-level errors shared by every component. Components map these
/// into their own closed error-kind enums at their public boundary; this
/// type exists so `?` works across crate lines without losing the source.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("openai error: {0}")]
    OpenAi(#[from] OpenAIError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("llm response parsing error: {0}")]
    LlmParsing(String),
    #[error("task join error: {0}")]
    Join(#[from] JoinError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("internal error: {0}")]
    InternalError(String),
}
