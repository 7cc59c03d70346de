use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
};
use async_openai::Client as OpenAiClient;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use storage::{Language, QaPair};

/// C4 failure kinds (spec §4.4).
#[derive(Debug, Error, Clone)]
pub enum LlmError {
    #[error("llm provider unavailable: {0}")]
    Unavailable(String),
    #[error("llm quota exhausted")]
    QuotaExhausted,
    #[error("llm response blocked by safety filter")]
    SafetyBlocked,
    #[error("llm response malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaState {
    Ok,
    Exhausted,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub reachable: bool,
    pub quota_state: QuotaState,
}

#[derive(Debug, Clone)]
pub struct AnswerResult {
    pub answer: String,
    pub confidence: f32,
    pub language_detected: Language,
    pub model_id: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedQa {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_article_confidence")]
    pub confidence: f32,
}

fn default_article_confidence() -> f32 {
    0.8
}

#[derive(Debug, Deserialize)]
struct ExtractedQaBatch {
    qa_pairs: Vec<ExtractedQa>,
}

const SYSTEM_MESSAGE: &str = "You are a careful bilingual (Arabic/English) question-answering \
assistant. Answer using the supplied context and prior Q&A pairs when relevant. Be concise \
and factual. Reply in the same language as the question.";

/// C4 LLM Client: answer synthesis, paraphrase generation, quota/health
/// reporting. Chat-completion request shape grounded in
/// `ingestion-pipeline/src/enricher.rs`; heuristics grounded in the
/// original `gemini_service.py`.
pub struct LlmClient {
    client: OpenAiClient<OpenAIConfig>,
    model: String,
    quota_state: Arc<Mutex<QuotaState>>,
}

impl LlmClient {
    pub fn new(client: OpenAiClient<OpenAIConfig>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            quota_state: Arc::new(Mutex::new(QuotaState::Unknown)),
        }
    }

    fn classify_error(&self, err: async_openai::error::OpenAIError) -> LlmError {
        let msg = err.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("quota") || lower.contains("rate limit") || lower.contains("429") {
            LlmError::QuotaExhausted
        } else if lower.contains("safety") || lower.contains("content_filter") {
            LlmError::SafetyBlocked
        } else {
            LlmError::Unavailable(msg)
        }
    }

    async fn record_quota(&self, state: QuotaState) {
        *self.quota_state.lock().await = state;
    }

    pub async fn answer(
        &self,
        question: &str,
        context: Option<&str>,
        language: Language,
        prior_pairs: &[QaPair],
    ) -> Result<AnswerResult, LlmError> {
        let started = Instant::now();

        let mut user_message = String::new();
        if let Some(ctx) = context {
            user_message.push_str("Context:\n");
            user_message.push_str(ctx);
            user_message.push_str("\n\n");
        }
        for pair in prior_pairs.iter().take(3) {
            user_message.push_str(&format!(
                "Previous Q: {}\nPrevious A: {}\n",
                pair.question_text, pair.answer_text
            ));
        }
        user_message.push_str(&format!("Question: {question}"));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(SYSTEM_MESSAGE).into(),
                ChatCompletionRequestUserMessage::from(user_message).into(),
            ])
            .build()
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        let response = match self.client.chat().create(request).await {
            Ok(response) => {
                self.record_quota(QuotaState::Ok).await;
                response
            }
            Err(e) => {
                let kind = self.classify_error(e);
                if matches!(kind, LlmError::QuotaExhausted) {
                    self.record_quota(QuotaState::Exhausted).await;
                }
                return Err(kind);
            }
        };

        let answer_text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| LlmError::Malformed("no content in llm response".to_string()))?;

        let confidence = calculate_confidence(question, &answer_text);
        let language_detected = match language {
            Language::Auto => detect_language(question),
            other => other,
        };

        Ok(AnswerResult {
            answer: answer_text,
            confidence,
            language_detected,
            model_id: self.model.clone(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Up to `n` paraphrases. Failures are swallowed — spec §4.4 marks
    /// this non-fatal.
    pub async fn generate_variants(&self, question: &str, n: usize) -> Vec<String> {
        let prompt = format!(
            "Generate up to {n} distinct paraphrases of the following question, one per line, \
             with no numbering or extra commentary:\n{question}"
        );

        let request = match CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(
                    "You rewrite questions as paraphrases, preserving meaning and language.",
                )
                .into(),
                ChatCompletionRequestUserMessage::from(prompt).into(),
            ])
            .build()
        {
            Ok(r) => r,
            Err(e) => {
                warn!("failed to build variant request: {e}");
                return Vec::new();
            }
        };

        let response = match self.client.chat().create(request).await {
            Ok(r) => r,
            Err(e) => {
                warn!("variant generation failed: {e}");
                return Vec::new();
            }
        };

        let Some(content) = response.choices.first().and_then(|c| c.message.content.clone())
        else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        content
            .lines()
            .map(|line| line.trim().trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')' || c == '-').trim())
            .map(|line| line.trim_matches('"').trim())
            .filter(|line| !line.is_empty())
            .filter(|line| seen.insert(line.to_string()))
            .take(n)
            .map(str::to_string)
            .collect()
    }

    pub async fn health(&self) -> HealthStatus {
        let quota_state = *self.quota_state.lock().await;
        HealthStatus {
            reachable: !matches!(quota_state, QuotaState::Exhausted),
            quota_state,
        }
    }

    /// Used by the news ingestion loop (C7): strict JSON-schema extraction
    /// of Q&A candidates from one article.
    pub async fn extract_qa_from_article(
        &self,
        title: &str,
        content: &str,
    ) -> Result<Vec<ExtractedQa>, LlmError> {
        let schema = article_qa_schema();
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Q&A pairs extracted from a news article".into()),
                name: "article_qa_pairs".into(),
                schema: Some(schema),
                strict: Some(true),
            },
        };

        let truncated_content: String = content.chars().take(2000).collect();
        let user_message = format!(
            "Article title: {title}\n\nArticle content:\n{truncated_content}\n\n\
             Extract 3-5 important question/answer pairs a reader might ask about this article."
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(
                    "You convert news articles into grounded question/answer pairs.",
                )
                .into(),
                ChatCompletionRequestUserMessage::from(user_message).into(),
            ])
            .response_format(response_format)
            .build()
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| self.classify_error(e))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| LlmError::Malformed("no content in llm response".to_string()))?;

        let batch: ExtractedQaBatch = serde_json::from_str(&content)
            .map_err(|e| LlmError::Malformed(format!("invalid article qa json: {e}")))?;

        Ok(batch.qa_pairs)
    }
}

fn article_qa_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "qa_pairs": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "question": {"type": "string"},
                        "answer": {"type": "string"},
                        "keywords": {"type": "array", "items": {"type": "string"}},
                        "confidence": {"type": "number"}
                    },
                    "required": ["question", "answer", "keywords", "confidence"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["qa_pairs"],
        "additionalProperties": false
    })
}

/// Deterministic confidence heuristic (spec §9 Open Question; grounded in
/// `gemini_service.py::_calculate_confidence`). Not LLM-reported.
pub fn calculate_confidence(question: &str, answer: &str) -> f32 {
    let mut confidence = 0.8f32;

    if answer.len() > 100 {
        confidence += 0.1;
    } else if answer.len() < 50 {
        confidence -= 0.1;
    }

    let question_words: HashSet<String> = tokenize(question);
    if !question_words.is_empty() {
        let answer_words: HashSet<String> = tokenize(answer);
        let overlap = question_words.intersection(&answer_words).count() as f32;
        let relevance = overlap / question_words.len() as f32;
        confidence += relevance * 0.1;
    }

    confidence.clamp(0.0, 1.0)
}

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "what", "who", "where", "when", "how", "why",
    "of", "in", "on", "to", "and", "or", "do", "does", "did",
];

/// Stopword-filtered tokenization (`gemini_service.py::_extract_keywords`).
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|w| !STOPWORDS.contains(&w.as_str()) && w.len() > 2)
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Arabic-range codepoint count vs ASCII letters
/// (`gemini_service.py::_detect_language`).
pub fn detect_language(text: &str) -> Language {
    let mut arabic = 0usize;
    let mut ascii_letters = 0usize;
    for ch in text.chars() {
        if ('\u{0600}'..='\u{06FF}').contains(&ch) {
            arabic += 1;
        } else if ch.is_ascii_alphabetic() {
            ascii_letters += 1;
        }
    }
    if arabic > ascii_letters {
        Language::Ar
    } else {
        Language::En
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_base_case() {
        let c = calculate_confidence("what is x", "x is fifty to ninety nine characters long ok");
        assert!((0.0..=1.0).contains(&c));
    }

    #[test]
    fn confidence_boosted_by_long_answer() {
        let long_answer = "a".repeat(150);
        let c = calculate_confidence("what is x", &long_answer);
        assert!(c >= 0.9);
    }

    #[test]
    fn confidence_penalized_by_short_answer() {
        let c = calculate_confidence("what is x", "short");
        assert!(c <= 0.7);
    }

    #[test]
    fn confidence_is_clamped() {
        let c = calculate_confidence("what is x is x is x is x", &"word ".repeat(200));
        assert!(c <= 1.0);
    }

    #[test]
    fn detect_language_arabic() {
        assert_eq!(detect_language("ما هي عاصمة سوريا"), Language::Ar);
    }

    #[test]
    fn detect_language_english() {
        assert_eq!(detect_language("what is the capital"), Language::En);
    }

    #[test]
    fn extract_keywords_drops_stopwords() {
        let keywords = extract_keywords("what is the capital of syria");
        assert!(!keywords.contains(&"the".to_string()));
        assert!(keywords.contains(&"capital".to_string()));
    }
}
