use std::time::Duration;

use common::AppConfig;

/// C6 tuning constants (spec §4.6.3).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub semantic_search_floor: f32,
    pub quality_threshold: f32,
    pub fallback_floor: f32,
    pub max_variants: usize,
    pub top_k: usize,
    pub context_timeout: Duration,
    pub deadline: Duration,
    /// Independent deadline for fire-and-forget variant expansion (spec
    /// §5: exempt from the caller's deadline, but still bounded).
    pub variant_expansion_deadline: Duration,
    /// Bound on how much scraped context text is folded into the
    /// generation prompt (spec §4.6.4 step 5a: "bounded by a character cap").
    pub max_context_chars: usize,
    pub max_context_articles: usize,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            semantic_search_floor: cfg.semantic_search_floor,
            quality_threshold: cfg.quality_threshold,
            fallback_floor: cfg.fallback_floor,
            max_variants: cfg.max_variants,
            top_k: cfg.top_k,
            context_timeout: Duration::from_secs(cfg.context_timeout_secs),
            deadline: Duration::from_secs(cfg.deadline_secs),
            variant_expansion_deadline: Duration::from_secs(cfg.variant_expansion_deadline_secs),
            max_context_chars: 2000,
            max_context_articles: 5,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            semantic_search_floor: 0.85,
            quality_threshold: 0.95,
            fallback_floor: 0.30,
            max_variants: 5,
            top_k: 5,
            context_timeout: Duration::from_secs(8),
            deadline: Duration::from_secs(30),
            variant_expansion_deadline: Duration::from_secs(20),
            max_context_chars: 2000,
            max_context_articles: 5,
        }
    }
}
