use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use url::Url;

/// C5 failure kinds.
#[derive(Debug, Error)]
pub enum WebFetcherError {
    #[error("url rejected: {0}")]
    UrlRejected(String),
    #[error("fetch failed after retries: {0}")]
    FetchFailed(String),
    #[error("page not found")]
    NotFound,
}

const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_millis(2000);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_MAX_CONCURRENT: usize = 5;
const DEFAULT_MIN_CONTENT_LEN: usize = 100;
const DEFAULT_MAX_CONTENT_LEN: usize = 50_000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const BLOCKED_WORDS: &[&str] = &["advertisement", "ad", "sponsored", "cookie", "privacy policy"];

const ARTICLE_URL_PATTERNS: &[&str] = &["/news/", "/article/", "/post/", "/story/", "/arabic/", "/ar/", "/en/"];

/// Selectors are comma-separated lists of CSS selectors tried in order,
/// matching the source config shape scraped sites are described with.
#[derive(Debug, Clone)]
pub struct SourceSelectors {
    pub article: String,
    pub title: String,
    pub content: String,
    pub date: String,
    pub author: String,
    pub category: String,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub base_url: String,
    pub selectors: SourceSelectors,
    pub language: String,
}

#[derive(Debug, Clone)]
pub struct Article {
    pub title: String,
    pub content: String,
    pub url: String,
    pub source: String,
    pub published_date: Option<String>,
    pub author: Option<String>,
    pub category: Option<String>,
    pub language: String,
    pub scraped_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ScrapeReport {
    pub articles: Vec<Article>,
    pub per_source_counts: HashMap<String, usize>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub rate_limit_delay: Duration,
    pub max_retries: u32,
    pub max_concurrent: usize,
    pub min_content_len: usize,
    pub max_content_len: usize,
    pub timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            rate_limit_delay: DEFAULT_RATE_LIMIT_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            min_content_len: DEFAULT_MIN_CONTENT_LEN,
            max_content_len: DEFAULT_MAX_CONTENT_LEN,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// C5 Web Fetcher: rate-limited, concurrency-capped, retrying scraper over
/// a set of configured news sources.
pub struct WebFetcher {
    client: reqwest::Client,
    config: FetcherConfig,
    last_request: Mutex<Option<Instant>>,
    semaphore: Arc<Semaphore>,
    scraped_urls: Mutex<HashSet<String>>,
}

impl WebFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, WebFetcherError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("Mozilla/5.0 (compatible; qa-service/0.1)")
            .build()
            .map_err(|e| WebFetcherError::FetchFailed(e.to_string()))?;
        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            config,
            last_request: Mutex::new(None),
            scraped_urls: Mutex::new(HashSet::new()),
        })
    }

    /// Blocks the caller until `rate_limit_delay` has elapsed since the
    /// last actual request. The wait is computed and `last_request` is
    /// updated inside the critical section; the sleep itself happens after
    /// the guard is dropped so other requesters aren't blocked from
    /// entering while this one waits (spec §5).
    async fn rate_limit(&self) {
        let wait = {
            let mut last = self.last_request.lock().await;
            let now = Instant::now();
            let wait = last
                .map(|prev| self.config.rate_limit_delay.saturating_sub(now.duration_since(prev)))
                .unwrap_or(Duration::ZERO);
            *last = Some(now);
            wait
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    #[instrument(skip(self), fields(url = %url))]
    async fn fetch_page(&self, url: &str) -> Result<String, WebFetcherError> {
        for attempt in 0..self.config.max_retries {
            self.rate_limit().await;
            let _permit = self.semaphore.acquire().await;
            match self.client.get(url).send().await {
                Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                    warn!("page not found: {url}");
                    return Err(WebFetcherError::NotFound);
                }
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .text()
                        .await
                        .map_err(|e| WebFetcherError::FetchFailed(e.to_string()));
                }
                Ok(resp) => {
                    warn!(status = %resp.status(), "unexpected status for {url}");
                }
                Err(e) => {
                    warn!("attempt {attempt} failed for {url}: {e}");
                }
            }
            if attempt + 1 < self.config.max_retries {
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }
        }
        Err(WebFetcherError::FetchFailed(format!("exhausted retries for {url}")))
    }

    #[instrument(skip(self, sources))]
    pub async fn scrape_sources(&self, sources: &[SourceConfig], max_articles_per_source: usize) -> ScrapeReport {
        let mut report = ScrapeReport::default();
        for source in sources {
            match self.scrape_source(source, max_articles_per_source).await {
                Ok(articles) => {
                    report.per_source_counts.insert(source.name.clone(), articles.len());
                    info!(source = %source.name, count = articles.len(), "scraped source");
                    report.articles.extend(articles);
                }
                Err(e) => {
                    report.per_source_counts.insert(source.name.clone(), 0);
                    report.errors.push(format!("{}: {e}", source.name));
                    warn!(source = %source.name, error = %e, "failed to scrape source");
                }
            }
        }
        report
    }

    async fn scrape_source(&self, source: &SourceConfig, max_articles: usize) -> Result<Vec<Article>, WebFetcherError> {
        let base = ensure_url_allowed(source.base_url.as_str())?;
        let main_page = self.fetch_page(base.as_str()).await?;
        let candidates = extract_article_links(&main_page, &base, source);

        let mut to_fetch = Vec::with_capacity(max_articles);
        {
            let scraped = self.scraped_urls.lock().await;
            for link in candidates {
                if to_fetch.len() >= max_articles {
                    break;
                }
                if !scraped.contains(link.as_str()) {
                    to_fetch.push(link);
                }
            }
        }

        let mut articles = Vec::new();
        for link in to_fetch {
            match self.scrape_article(&link, source).await {
                Ok(Some(article)) => articles.push(article),
                Ok(None) => {}
                Err(e) => warn!(url = %link, error = %e, "failed to scrape article"),
            }
        }
        Ok(articles)
    }

    async fn scrape_article(&self, url: &Url, source: &SourceConfig) -> Result<Option<Article>, WebFetcherError> {
        let content = match self.fetch_page(url.as_str()).await {
            Ok(c) => c,
            Err(WebFetcherError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };

        let title = extract_first(&content, &source.selectors.title);
        let body = extract_content(&content, &source.selectors.content);
        let published_date = extract_first_opt(&content, &source.selectors.date);
        let author = extract_first_opt(&content, &source.selectors.author);
        let category = extract_first_opt(&content, &source.selectors.category);

        if !is_valid_article(&title, &body, self.config.min_content_len, self.config.max_content_len) {
            return Ok(None);
        }

        let title = clean_text(&title);
        let body = clean_text(&body);

        self.scraped_urls.lock().await.insert(url.to_string());

        Ok(Some(Article {
            title,
            content: body,
            url: url.to_string(),
            source: source.name.clone(),
            published_date,
            author,
            category,
            language: source.language.clone(),
            scraped_at: Utc::now(),
        }))
    }
}

fn extract_article_links(html: &str, base: &Url, source: &SourceConfig) -> Vec<Url> {
    let doc = Html::parse_document(html);
    let Ok(a_sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in doc.select(&a_sel) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(absolute) = base.join(href) else {
            continue;
        };
        if is_article_link(&absolute, base, source) && seen.insert(absolute.to_string()) {
            links.push(absolute);
        }
    }
    links
}

fn is_article_link(url: &Url, base: &Url, source: &SourceConfig) -> bool {
    if url.host_str() != base.host_str() {
        return false;
    }
    let path = url.path();
    let lower = path.to_ascii_lowercase();

    let _ = &source.name;
    if ARTICLE_URL_PATTERNS.iter().any(|p| lower.contains(p)) {
        return true;
    }
    if has_date_segment(&lower) || lower.chars().last().is_some_and(|c| c.is_ascii_digit()) {
        return true;
    }
    false
}

fn has_date_segment(path: &str) -> bool {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    segments.windows(3).any(|w| {
        w[0].len() == 4
            && w[0].chars().all(|c| c.is_ascii_digit())
            && w[1].len() <= 2
            && w[1].chars().all(|c| c.is_ascii_digit())
            && w[2].len() <= 2
            && w[2].chars().all(|c| c.is_ascii_digit())
    })
}

fn extract_first(html: &str, selector_list: &str) -> String {
    extract_first_opt(html, selector_list).unwrap_or_default()
}

fn extract_first_opt(html: &str, selector_list: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    for sel in selector_list.split(',') {
        let sel = sel.trim();
        if sel.is_empty() {
            continue;
        }
        let Ok(parsed) = Selector::parse(sel) else {
            continue;
        };
        if let Some(node) = doc.select(&parsed).next() {
            if let Some(dt) = node.value().attr("datetime") {
                return Some(dt.to_string());
            }
            let text: String = node.text().collect::<Vec<_>>().join(" ");
            let text = text.trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }
    None
}

fn extract_content(html: &str, selector_list: &str) -> String {
    let doc = Html::parse_document(html);
    let mut parts = Vec::new();
    for sel in selector_list.split(',') {
        let sel = sel.trim();
        if sel.is_empty() {
            continue;
        }
        let Ok(parsed) = Selector::parse(sel) else {
            continue;
        };
        for node in doc.select(&parsed) {
            let text: String = node.text().collect::<Vec<_>>().join(" ");
            let text = text.trim();
            if !text.is_empty() {
                parts.push(text.to_string());
            }
        }
    }
    parts.join(" ")
}

fn is_valid_article(title: &str, content: &str, min_len: usize, max_len: usize) -> bool {
    if title.is_empty() || content.is_empty() {
        return false;
    }
    if content.len() < min_len || content.len() > max_len {
        return false;
    }
    let lower = format!("{title} {content}").to_ascii_lowercase();
    !BLOCKED_WORDS.iter().any(|w| lower.contains(w))
}

fn clean_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut cleaned = collapsed;
    for word in BLOCKED_WORDS {
        cleaned = regex_free_remove(&cleaned, word);
    }
    cleaned.replace("&nbsp;", " ").replace("&amp;", "&").trim().to_string()
}

/// Case-insensitive whole-substring removal without pulling in a regex
/// dependency the rest of the stack doesn't otherwise need.
fn regex_free_remove(text: &str, needle: &str) -> String {
    if needle.is_empty() {
        return text.to_string();
    }
    let lower_text = text.to_ascii_lowercase();
    let lower_needle = needle.to_ascii_lowercase();
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    let mut rest_lower: &str = &lower_text;
    while let Some(idx) = rest_lower.find(&lower_needle) {
        result.push_str(&rest[..idx]);
        let end = idx + needle.len();
        rest = &rest[end..];
        rest_lower = &rest_lower[end..];
    }
    result.push_str(rest);
    result
}

/// Rejects scrape targets outside http(s) or pointed at internal network
/// ranges, adapted from the ingestion URL guard used elsewhere.
pub fn ensure_url_allowed(raw: &str) -> Result<Url, WebFetcherError> {
    let url = Url::parse(raw).map_err(|e| WebFetcherError::UrlRejected(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            warn!(%url, %scheme, "rejected scrape URL with unsupported scheme");
            return Err(WebFetcherError::UrlRejected("unsupported URL scheme".to_string()));
        }
    }

    let Some(host) = url.host_str() else {
        return Err(WebFetcherError::UrlRejected("URL is missing a host component".to_string()));
    };

    if host.eq_ignore_ascii_case("localhost") {
        return Err(WebFetcherError::UrlRejected("scrape URL host is not allowed".to_string()));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        let is_disallowed = match ip {
            IpAddr::V4(v4) => v4.is_private() || v4.is_link_local(),
            IpAddr::V6(v6) => v6.is_unique_local() || v6.is_unicast_link_local(),
        };
        if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() || is_disallowed {
            warn!(%url, host, %ip, "rejected scrape URL pointing to restricted network range");
            return Err(WebFetcherError::UrlRejected("scrape URL host is not allowed".to_string()));
        }
    }

    Ok(url)
}
