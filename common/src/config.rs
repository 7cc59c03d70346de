use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Single configuration record for the whole service, loaded the way the
/// teacher loads its `AppConfig`: an optional `config.toml` under process
/// environment variables.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,

    pub surrealdb_address: String,
    #[serde(default = "default_surrealdb_username")]
    pub surrealdb_username: String,
    #[serde(default = "default_surrealdb_password")]
    pub surrealdb_password: String,
    #[serde(default = "default_surrealdb_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_surrealdb_database")]
    pub surrealdb_database: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// C1 embedding dimension D; fixed at construction (spec §3 invariant 4).
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    #[serde(default = "default_semantic_search_floor")]
    pub semantic_search_floor: f32,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f32,
    #[serde(default = "default_fallback_floor")]
    pub fallback_floor: f32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_variants")]
    pub max_variants: usize,
    #[serde(default = "default_context_timeout_secs")]
    pub context_timeout_secs: u64,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default = "default_variant_expansion_deadline_secs")]
    pub variant_expansion_deadline_secs: u64,

    #[serde(default = "default_news_period_secs")]
    pub news_period_secs: u64,
    #[serde(default = "default_news_max_articles")]
    pub news_max_articles: usize,

    #[serde(default = "default_scrape_delay_secs")]
    pub scrape_delay_secs: f64,
    #[serde(default = "default_scrape_max_concurrent")]
    pub scrape_max_concurrent: usize,
    #[serde(default = "default_scrape_max_retries")]
    pub scrape_max_retries: u32,
    #[serde(default = "default_scrape_min_content_len")]
    pub scrape_min_content_len: usize,
    #[serde(default = "default_scrape_max_content_len")]
    pub scrape_max_content_len: usize,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_surrealdb_username() -> String {
    "root".to_string()
}
fn default_surrealdb_password() -> String {
    "root".to_string()
}
fn default_surrealdb_namespace() -> String {
    "qa".to_string()
}
fn default_surrealdb_database() -> String {
    "qa".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_embedding_dim() -> usize {
    768
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_semantic_search_floor() -> f32 {
    0.85
}
fn default_quality_threshold() -> f32 {
    0.95
}
fn default_fallback_floor() -> f32 {
    0.30
}
fn default_top_k() -> usize {
    5
}
fn default_max_variants() -> usize {
    5
}
fn default_context_timeout_secs() -> u64 {
    8
}
fn default_deadline_secs() -> u64 {
    30
}
fn default_variant_expansion_deadline_secs() -> u64 {
    20
}
fn default_news_period_secs() -> u64 {
    6 * 60 * 60
}
fn default_news_max_articles() -> usize {
    100
}
fn default_scrape_delay_secs() -> f64 {
    2.0
}
fn default_scrape_max_concurrent() -> usize {
    5
}
fn default_scrape_max_retries() -> u32 {
    3
}
fn default_scrape_min_content_len() -> usize {
    100
}
fn default_scrape_max_content_len() -> usize {
    50_000
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
