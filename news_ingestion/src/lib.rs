use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::ids::ingestion_qa_id;
use common::normalize::normalize_question;
use embedding::EmbeddingProvider;
use llm::LlmClient;
use qa_pipeline::{AdmitRequest, QaPipeline};
use serde_json::json;
use storage::{Language, Source};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use web_fetcher::{Article, FetcherConfig, SourceConfig, SourceSelectors, WebFetcher};

/// C7 tuning (spec §4.7). `period`/`max_articles_per_cycle`/`fetcher` are
/// sourced from `common::AppConfig`; `sources` has no config surface yet
/// and is seeded from `default_sources`.
#[derive(Debug, Clone)]
pub struct NewsIngestionConfig {
    pub period: Duration,
    pub max_articles_per_cycle: usize,
    pub sources: Vec<SourceConfig>,
    pub fetcher: FetcherConfig,
}

impl NewsIngestionConfig {
    pub fn from_app_config(cfg: &common::AppConfig) -> Self {
        Self {
            period: Duration::from_secs(cfg.news_period_secs),
            max_articles_per_cycle: cfg.news_max_articles,
            sources: default_sources(),
            fetcher: FetcherConfig {
                rate_limit_delay: Duration::from_secs_f64(cfg.scrape_delay_secs),
                max_retries: cfg.scrape_max_retries,
                max_concurrent: cfg.scrape_max_concurrent,
                min_content_len: cfg.scrape_min_content_len,
                max_content_len: cfg.scrape_max_content_len,
                ..FetcherConfig::default()
            },
        }
    }
}

/// The four Syrian news sources the original service shipped with.
pub fn default_sources() -> Vec<SourceConfig> {
    let generic = SourceSelectors {
        article: "article, .news-item, .post".to_string(),
        title: "h1, h2, .title, .headline".to_string(),
        content: ".content, .article-content, .post-content, .text".to_string(),
        date: ".date, .published, time".to_string(),
        author: ".author, .byline".to_string(),
        category: ".category, .section".to_string(),
    };

    vec![
        SourceConfig {
            name: "sana".to_string(),
            base_url: "https://www.sana.sy".to_string(),
            selectors: generic.clone(),
            language: "ar".to_string(),
        },
        SourceConfig {
            name: "halab_today".to_string(),
            base_url: "https://halabtoday.tv".to_string(),
            selectors: generic.clone(),
            language: "ar".to_string(),
        },
        SourceConfig {
            name: "syria_tv".to_string(),
            base_url: "https://www.syria.tv".to_string(),
            selectors: generic.clone(),
            language: "ar".to_string(),
        },
        SourceConfig {
            name: "government".to_string(),
            base_url: "https://www.egov.sy".to_string(),
            selectors: SourceSelectors {
                article: "article, .news-item, .announcement".to_string(),
                content: ".content, .article-content, .announcement-content".to_string(),
                ..generic
            },
            language: "ar".to_string(),
        },
    ]
}

fn language_from_code(code: &str) -> Language {
    match code {
        "ar" => Language::Ar,
        "en" => Language::En,
        _ => Language::Auto,
    }
}

/// Aggregate result of one ingestion cycle (spec §4.7).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CycleReport {
    pub articles_scraped: usize,
    pub pairs_generated: usize,
    pub pairs_stored: usize,
    pub per_source: HashMap<String, usize>,
    pub errors: Vec<String>,
}

/// C7 News Ingestion: scrape -> per-article QA extraction -> admit via
/// C6's shared admission path. Drop-if-busy guarantees at most one cycle
/// runs at a time, whether triggered by the periodic tick or the manual
/// `ingest_news` operation (spec §6).
pub struct NewsIngestionService {
    fetcher: Arc<WebFetcher>,
    llm: Arc<LlmClient>,
    embedding: Arc<EmbeddingProvider>,
    pipeline: Arc<QaPipeline>,
    recent_articles: Arc<RwLock<Vec<Article>>>,
    running: Arc<AtomicBool>,
    config: NewsIngestionConfig,
}

impl NewsIngestionService {
    pub fn new(
        llm: Arc<LlmClient>,
        embedding: Arc<EmbeddingProvider>,
        pipeline: Arc<QaPipeline>,
        recent_articles: Arc<RwLock<Vec<Article>>>,
        config: NewsIngestionConfig,
    ) -> Result<Self, web_fetcher::WebFetcherError> {
        let fetcher = WebFetcher::new(config.fetcher.clone())?;
        Ok(Self {
            fetcher: Arc::new(fetcher),
            llm,
            embedding,
            pipeline,
            recent_articles,
            running: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// Runs a cycle if none is in flight; returns `None` if a cycle was
    /// already running (spec §4.7: "never more than one cycle concurrently").
    #[instrument(skip(self))]
    pub async fn trigger_cycle(&self) -> Option<CycleReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("ingestion cycle already in progress; dropping this trigger");
            return None;
        }

        let report = self.run_cycle().await;
        self.running.store(false, Ordering::SeqCst);
        Some(report)
    }

    /// Periodic driver: ticks every `config.period`, invoking
    /// `trigger_cycle` and logging the outcome. Intended to be spawned
    /// once at startup and run for the lifetime of the process.
    pub async fn run_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.period);
        loop {
            interval.tick().await;
            match self.trigger_cycle().await {
                Some(report) => info!(
                    articles_scraped = report.articles_scraped,
                    pairs_generated = report.pairs_generated,
                    pairs_stored = report.pairs_stored,
                    "news ingestion cycle complete"
                ),
                None => info!("news ingestion cycle skipped (already running)"),
            }
        }
    }

    async fn run_cycle(&self) -> CycleReport {
        let scrape = self
            .fetcher
            .scrape_sources(&self.config.sources, self.config.max_articles_per_cycle)
            .await;

        let mut report = CycleReport {
            articles_scraped: scrape.articles.len(),
            per_source: scrape.per_source_counts,
            errors: scrape.errors,
            ..Default::default()
        };

        {
            let mut cache = self.recent_articles.write().await;
            *cache = scrape.articles.clone();
        }

        for article in &scrape.articles {
            let extracted = match self.llm.extract_qa_from_article(&article.title, &article.content).await {
                Ok(pairs) => pairs,
                Err(e) => {
                    warn!(url = %article.url, error = %e, "failed to extract qa pairs from article");
                    report.errors.push(format!("{}: {e}", article.url));
                    continue;
                }
            };

            for qa in extracted {
                let question = qa.question.trim();
                let answer = qa.answer.trim();
                if question.is_empty() || answer.is_empty() {
                    continue;
                }
                let normalized = normalize_question(question);
                report.pairs_generated += 1;

                let embedding = match self.embedding.embed(&normalized).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(question = %normalized, error = %e, "failed to embed extracted qa pair");
                        continue;
                    }
                };

                let qa_id = ingestion_qa_id(&normalized, answer);
                let req = AdmitRequest {
                    question: normalized,
                    answer: answer.to_string(),
                    embedding,
                    confidence: qa.confidence,
                    metadata: json!({
                        "keywords": qa.keywords,
                        "article_url": article.url,
                        "article_source": article.source,
                        "article_title": article.title,
                    }),
                    user_id: None,
                    source: Source::Ingested,
                    language: language_from_code(&article.language),
                    qa_id_override: Some(qa_id),
                };

                match self.pipeline.admit(req).await {
                    Ok(_) => report.pairs_stored += 1,
                    Err(e) => {
                        warn!(url = %article.url, error = %e, "failed to admit ingested qa pair");
                        report.errors.push(format!("admit failed for {}: {e}", article.url));
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedding::EmbeddingProvider;
    use qa_pipeline::PipelineConfig;
    use storage::{CanonicalStore, SurrealDbClient, VectorIndex};

    const DIM: usize = 8;

    #[tokio::test]
    async fn default_sources_are_all_distinct_and_non_empty() {
        let sources = default_sources();
        assert_eq!(sources.len(), 4);
        let mut names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 4);
    }

    #[tokio::test]
    async fn trigger_cycle_drops_concurrent_calls() {
        let db = Arc::new(
            SurrealDbClient::memory("news_ingestion_test", "db1")
                .await
                .expect("mem db"),
        );
        db.build_indexes(DIM).await.expect("build indexes");

        let pipeline = Arc::new(QaPipeline::new(
            Arc::new(EmbeddingProvider::hashed(DIM)),
            Arc::new(VectorIndex::new(Arc::clone(&db), DIM)),
            Arc::new(CanonicalStore::new(db)),
            None,
            Arc::new(RwLock::new(Vec::new())),
            PipelineConfig::default(),
        ));

        let service = Arc::new(
            NewsIngestionService::new(
                Arc::new(LlmClient::new(
                    async_openai::Client::with_config(async_openai::config::OpenAIConfig::new()),
                    "unused".to_string(),
                )),
                Arc::new(EmbeddingProvider::hashed(DIM)),
                pipeline,
                Arc::new(RwLock::new(Vec::new())),
                NewsIngestionConfig {
                    period: Duration::from_secs(3600),
                    max_articles_per_cycle: 0,
                    sources: Vec::new(),
                    fetcher: FetcherConfig::default(),
                },
            )
            .expect("service"),
        );

        service.running.store(true, Ordering::SeqCst);
        let result = service.trigger_cycle().await;
        assert!(result.is_none());
    }
}
