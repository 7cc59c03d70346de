use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::CreateEmbeddingRequestArgs;
use async_openai::Client as OpenAiClient;
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

/// C1 failure kinds (spec §4.1).
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    #[error("embedding provider rate limited")]
    RateLimited,
    #[error("text exceeds provider limit: {0} chars")]
    Oversize(usize),
}

/// How many texts go in one provider request before pausing (spec §4.1:
/// "sub-batches of configurable size with a small inter-batch pause").
const DEFAULT_SUB_BATCH_SIZE: usize = 16;
const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(200);
/// Conservative default; real provider limits vary but this keeps a single
/// request from ballooning.
const DEFAULT_MAX_CHARS: usize = 8000;

#[derive(Clone)]
enum Backend {
    Hashed {
        dimension: usize,
    },
    OpenAi {
        client: OpenAiClient<OpenAIConfig>,
        model: String,
        dimension: usize,
    },
    FastEmbed {
        model: Arc<Mutex<TextEmbedding>>,
        model_name: EmbeddingModel,
        dimension: usize,
    },
}

/// C1 Embedding Provider: turns text into a fixed-dimension vector.
/// `D` is fixed once the backend is constructed (spec §3 invariant 4).
#[derive(Clone)]
pub struct EmbeddingProvider {
    backend: Backend,
    sub_batch_size: usize,
    batch_pause: Duration,
    max_chars: usize,
}

impl EmbeddingProvider {
    pub fn hashed(dimension: usize) -> Self {
        Self {
            backend: Backend::Hashed {
                dimension: dimension.max(1),
            },
            sub_batch_size: DEFAULT_SUB_BATCH_SIZE,
            batch_pause: DEFAULT_BATCH_PAUSE,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }

    pub fn openai(client: OpenAiClient<OpenAIConfig>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            backend: Backend::OpenAi {
                client,
                model: model.into(),
                dimension,
            },
            sub_batch_size: DEFAULT_SUB_BATCH_SIZE,
            batch_pause: DEFAULT_BATCH_PAUSE,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }

    pub async fn fastembed(model_code: Option<&str>) -> Result<Self, EmbeddingError> {
        let model_name = match model_code {
            Some(code) => EmbeddingModel::from_str(code)
                .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?,
            None => EmbeddingModel::default(),
        };

        let options = TextInitOptions::new(model_name.clone()).with_show_download_progress(true);
        let model_name_for_task = model_name.clone();

        let (model, dimension) = tokio::task::spawn_blocking(move || {
            let model = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;
            let info = EmbeddingModel::get_model_info(&model_name_for_task)
                .ok_or_else(|| EmbeddingError::Unavailable("model metadata missing".to_string()))?;
            Ok::<_, EmbeddingError>((model, info.dim))
        })
        .await
        .map_err(|e| EmbeddingError::Unavailable(e.to_string()))??;

        Ok(Self {
            backend: Backend::FastEmbed {
                model: Arc::new(Mutex::new(model)),
                model_name,
                dimension,
            },
            sub_batch_size: DEFAULT_SUB_BATCH_SIZE,
            batch_pause: DEFAULT_BATCH_PAUSE,
            max_chars: DEFAULT_MAX_CHARS,
        })
    }

    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            Backend::Hashed { .. } => "hashed",
            Backend::OpenAi { .. } => "openai",
            Backend::FastEmbed { .. } => "fastembed",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.backend {
            Backend::Hashed { dimension } => *dimension,
            Backend::OpenAi { dimension, .. } => *dimension,
            Backend::FastEmbed { dimension, .. } => *dimension,
        }
    }

    fn check_size(&self, text: &str) -> Result<(), EmbeddingError> {
        if text.len() > self.max_chars {
            return Err(EmbeddingError::Oversize(text.len()));
        }
        Ok(())
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.check_size(text)?;
        match &self.backend {
            Backend::Hashed { dimension } => Ok(hashed_embedding(text, *dimension)),
            Backend::OpenAi {
                client,
                model,
                dimension,
            } => embed_openai(client, model, *dimension, std::slice::from_ref(&text.to_owned()))
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| EmbeddingError::Unavailable("empty response".to_string())),
            Backend::FastEmbed { model, .. } => {
                let mut guard = model.lock().await;
                let embeddings = guard
                    .embed(vec![text.to_owned()], None)
                    .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;
                embeddings
                    .into_iter()
                    .next()
                    .ok_or_else(|| EmbeddingError::Unavailable("empty response".to_string()))
            }
        }
    }

    /// Processes in sub-batches of `sub_batch_size` with a pause between
    /// them; any sub-batch failure fails the whole call (spec §4.1:
    /// all-or-nothing).
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        for text in &texts {
            self.check_size(text)?;
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        match &self.backend {
            Backend::Hashed { dimension } => Ok(texts
                .into_iter()
                .map(|text| hashed_embedding(&text, *dimension))
                .collect()),
            Backend::OpenAi {
                client,
                model,
                dimension,
            } => {
                let mut results = Vec::with_capacity(texts.len());
                let chunks: Vec<&[String]> = texts.chunks(self.sub_batch_size).collect();
                for (i, chunk) in chunks.iter().enumerate() {
                    let embeddings = embed_openai(client, model, *dimension, chunk).await?;
                    results.extend(embeddings);
                    if i + 1 < chunks.len() {
                        tokio::time::sleep(self.batch_pause).await;
                    }
                }
                Ok(results)
            }
            Backend::FastEmbed { model, .. } => {
                let mut results = Vec::with_capacity(texts.len());
                let chunks: Vec<Vec<String>> = texts
                    .chunks(self.sub_batch_size)
                    .map(|c| c.to_vec())
                    .collect();
                let chunk_count = chunks.len();
                for (i, chunk) in chunks.into_iter().enumerate() {
                    let mut guard = model.lock().await;
                    let embeddings = guard
                        .embed(chunk, None)
                        .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;
                    drop(guard);
                    results.extend(embeddings);
                    if i + 1 < chunk_count {
                        tokio::time::sleep(self.batch_pause).await;
                    }
                }
                Ok(results)
            }
        }
    }
}

async fn embed_openai(
    client: &OpenAiClient<OpenAIConfig>,
    model: &str,
    dimension: usize,
    inputs: &[String],
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let request = CreateEmbeddingRequestArgs::default()
        .model(model)
        .dimensions(dimension as u32)
        .input(inputs.to_vec())
        .build()
        .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

    let response = client.embeddings().create(request).await.map_err(|e| {
        let msg = e.to_string();
        if msg.to_lowercase().contains("rate limit") {
            warn!("embedding provider rate limited");
            EmbeddingError::RateLimited
        } else {
            EmbeddingError::Unavailable(msg)
        }
    })?;

    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

/// Cosine similarity rescaled so 1.0 = identical; 0 for either zero-norm
/// input (spec §4.1).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    if text.is_empty() {
        return vector;
    }

    let mut token_count = 0f32;
    for token in tokens(text) {
        token_count += 1.0;
        let idx = bucket(&token, dim);
        vector[idx] += 1.0;
    }

    if token_count == 0.0 {
        return vector;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashed_embed_is_deterministic() {
        let provider = EmbeddingProvider::hashed(32);
        let a = provider.embed("hello world").await.unwrap();
        let b = provider.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn hashed_embed_batch_matches_single() {
        let provider = EmbeddingProvider::hashed(16);
        let single = provider.embed("foo bar").await.unwrap();
        let batch = provider
            .embed_batch(vec!["foo bar".to_string()])
            .await
            .unwrap();
        assert_eq!(batch[0], single);
    }

    #[tokio::test]
    async fn oversize_text_is_rejected() {
        let provider = EmbeddingProvider::hashed(8);
        let huge = "a".repeat(DEFAULT_MAX_CHARS + 1);
        let err = provider.embed(&huge).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Oversize(_)));
    }

    #[test]
    fn cosine_similarity_zero_norm_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn cosine_similarity_identical_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn empty_batch_returns_empty() {
        let provider = EmbeddingProvider::hashed(8);
        let result = provider.embed_batch(vec![]).await.unwrap();
        assert!(result.is_empty());
    }
}
