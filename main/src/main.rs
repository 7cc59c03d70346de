use std::sync::Arc;

use api_router::api_state::ApiState;
use async_openai::{config::OpenAIConfig, Client as OpenAiClient};
use common::config::get_config;
use embedding::EmbeddingProvider;
use llm::LlmClient;
use news_ingestion::{NewsIngestionConfig, NewsIngestionService};
use qa_pipeline::{PipelineConfig, QaPipeline};
use storage::{CanonicalStore, SurrealDbClient, VectorIndex};
use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized(config.embedding_dim).await?;

    let openai_client = OpenAiClient::with_config(
        OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    );

    let embedding_provider = Arc::new(EmbeddingProvider::openai(
        openai_client.clone(),
        config.embedding_model.as_str(),
        config.embedding_dim,
    ));
    let llm_client = Arc::new(LlmClient::new(openai_client, config.llm_model.as_str()));

    let canonical = Arc::new(CanonicalStore::new(db.clone()));
    let vector_index = Arc::new(VectorIndex::new(db.clone(), config.embedding_dim));
    let recent_articles = Arc::new(RwLock::new(Vec::new()));

    let pipeline = Arc::new(QaPipeline::new(
        embedding_provider.clone(),
        vector_index,
        canonical,
        Some(llm_client.clone()),
        recent_articles.clone(),
        PipelineConfig::from(&config),
    ));

    let news = Arc::new(NewsIngestionService::new(
        llm_client.clone(),
        embedding_provider.clone(),
        pipeline.clone(),
        recent_articles,
        NewsIngestionConfig::from_app_config(&config),
    )?);

    tokio::spawn(news.clone().run_loop());

    let api_state = ApiState {
        pipeline,
        news,
        db,
        embedding: embedding_provider,
        llm: Some(llm_client),
        embedding_dim: config.embedding_dim,
        fetcher_configured: true,
    };

    let app = axum::Router::new()
        .nest("/api/v1", api_router::api_routes_v1::<ApiState>())
        .with_state(api_state);

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    if let Err(e) = axum::serve(listener, app).await {
        error!("server error: {e}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn build_test_app() -> axum::Router {
        let namespace = "main_smoke_test";
        let database = format!("db_{}", Uuid::new_v4());
        let db = Arc::new(SurrealDbClient::memory(namespace, &database).await.expect("mem db"));
        db.ensure_initialized(8).await.expect("init db");

        let embedding_provider = Arc::new(EmbeddingProvider::hashed(8));
        let canonical = Arc::new(CanonicalStore::new(db.clone()));
        let vector_index = Arc::new(VectorIndex::new(db.clone(), 8));
        let recent_articles = Arc::new(RwLock::new(Vec::new()));

        let pipeline = Arc::new(QaPipeline::new(
            embedding_provider.clone(),
            vector_index,
            canonical,
            None,
            recent_articles.clone(),
            PipelineConfig::default(),
        ));

        let news = Arc::new(
            NewsIngestionService::new(
                Arc::new(LlmClient::new(OpenAiClient::with_config(OpenAIConfig::new()), "unused")),
                embedding_provider.clone(),
                pipeline.clone(),
                recent_articles,
                NewsIngestionConfig {
                    period: std::time::Duration::from_secs(3600),
                    max_articles_per_cycle: 0,
                    sources: Vec::new(),
                    fetcher: web_fetcher::FetcherConfig::default(),
                },
            )
            .expect("news service"),
        );

        let api_state = ApiState {
            pipeline,
            news,
            db,
            embedding: embedding_provider,
            llm: None,
            embedding_dim: 8,
            fetcher_configured: false,
        };

        axum::Router::new()
            .nest("/api/v1", api_router::api_routes_v1::<ApiState>())
            .with_state(api_state)
    }

    #[tokio::test]
    async fn liveness_is_ok() {
        let app = build_test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/api/v1/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_reports_degraded_without_llm() {
        let app = build_test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/api/v1/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ask_rejects_empty_question() {
        let app = build_test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/ask")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"question": "   "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
