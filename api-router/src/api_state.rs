use std::sync::Arc;

use embedding::EmbeddingProvider;
use llm::LlmClient;
use news_ingestion::NewsIngestionService;
use qa_pipeline::QaPipeline;
use storage::SurrealDbClient;

/// Shared handler state for the QA service's HTTP surface.
#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<QaPipeline>,
    pub news: Arc<NewsIngestionService>,
    pub db: Arc<SurrealDbClient>,
    pub embedding: Arc<EmbeddingProvider>,
    pub llm: Option<Arc<LlmClient>>,
    pub embedding_dim: usize,
    pub fetcher_configured: bool,
}
