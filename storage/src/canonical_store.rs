use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::db::SurrealDbClient;

const TABLE: &str = "qa_pair";

/// C3 failure kinds (spec §4.3).
#[derive(Debug, Error)]
pub enum CanonicalStoreError {
    #[error("qa pair not found: {0}")]
    NotFound(String),
    #[error("qa pair already exists for id {0}")]
    DuplicateId(String),
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("storage error: {0}")]
    StorageError(String),
}

/// SurrealDB doesn't give a structured duplicate-key error code through
/// this driver version, so classification is by message text — the same
/// pragmatic approach the teacher's `AppError::InternalError` fallback
/// uses for driver errors that don't carry a dedicated variant.
fn classify_create_error(err: surrealdb::Error, id: &str) -> CanonicalStoreError {
    let msg = err.to_string();
    if msg.contains("already contains") || msg.contains("already exists") {
        if msg.contains("question_text") || msg.contains("UNIQUE") || msg.contains("unique") {
            CanonicalStoreError::Constraint(msg)
        } else {
            CanonicalStoreError::DuplicateId(id.to_string())
        }
    } else {
        CanonicalStoreError::StorageError(msg)
    }
}

impl From<surrealdb::Error> for CanonicalStoreError {
    fn from(err: surrealdb::Error) -> Self {
        CanonicalStoreError::StorageError(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Cache,
    Generated,
    Ingested,
    Variant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Ar,
    En,
    Auto,
}

/// The canonical record (spec §3 QAPair). Immutable after admission
/// except `metadata`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QaPair {
    pub id: String,
    pub question_text: String,
    pub answer_text: String,
    pub confidence: f32,
    pub source: Source,
    pub language: Language,
    pub created_at: DateTime<Utc>,
    pub metadata: JsonValue,
}

#[derive(Default, Clone)]
pub struct RecentFilter {
    pub source: Option<Source>,
}

/// C3 Canonical Store.
pub struct CanonicalStore {
    db: Arc<SurrealDbClient>,
}

impl CanonicalStore {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    pub async fn create(&self, qa_pair: QaPair) -> Result<String, CanonicalStoreError> {
        let id = qa_pair.id.clone();
        let created: Option<QaPair> = self
            .db
            .client
            .create((TABLE, id.as_str()))
            .content(qa_pair)
            .await
            .map_err(|e| classify_create_error(e, &id))?;

        created
            .map(|q| q.id)
            .ok_or_else(|| CanonicalStoreError::StorageError("create returned no row".into()))
    }

    pub async fn get(&self, qa_id: &str) -> Result<Option<QaPair>, CanonicalStoreError> {
        let row: Option<QaPair> = self.db.client.select((TABLE, qa_id)).await?;
        Ok(row)
    }

    /// Used by the admission dedup check (spec §4.6.5).
    pub async fn find_by_question_text(
        &self,
        question_text: &str,
    ) -> Result<Option<QaPair>, CanonicalStoreError> {
        let mut response = self
            .db
            .client
            .query(format!(
                "SELECT * FROM {TABLE} WHERE question_text = $question_text LIMIT 1;"
            ))
            .bind(("question_text", question_text.to_string()))
            .await?;

        let rows: Vec<QaPair> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    pub async fn list_recent(
        &self,
        limit: usize,
        filter: RecentFilter,
    ) -> Result<Vec<QaPair>, CanonicalStoreError> {
        let where_clause = match filter.source {
            Some(source) => format!(
                " WHERE source = '{}'",
                serde_json::to_value(source)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default()
            ),
            None => String::new(),
        };

        let sql = format!(
            "SELECT * FROM {TABLE}{where_clause} ORDER BY created_at DESC LIMIT {limit};"
        );
        let mut response = self.db.client.query(sql).await?;
        let rows: Vec<QaPair> = response.take(0)?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    async fn setup() -> CanonicalStore {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.build_indexes(4).await.expect("build indexes");
        CanonicalStore::new(Arc::new(db))
    }

    fn sample(id: &str, question: &str) -> QaPair {
        QaPair {
            id: id.to_string(),
            question_text: question.to_string(),
            answer_text: "an answer".to_string(),
            confidence: 0.9,
            source: Source::Generated,
            language: Language::En,
            created_at: Utc::now(),
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let store = setup().await;
        let id = store.create(sample("qa1", "what is x?")).await.expect("create");
        let fetched = store.get(&id).await.expect("get").expect("present");
        assert_eq!(fetched.question_text, "what is x?");
    }

    #[tokio::test]
    async fn duplicate_question_text_is_rejected() {
        let store = setup().await;
        store.create(sample("qa1", "dup?")).await.expect("first create");
        let err = store.create(sample("qa2", "dup?")).await.unwrap_err();
        assert!(matches!(
            err,
            CanonicalStoreError::Constraint(_) | CanonicalStoreError::DuplicateId(_)
        ));
    }

    #[tokio::test]
    async fn find_by_question_text_finds_existing() {
        let store = setup().await;
        store.create(sample("qa1", "find me?")).await.expect("create");
        let found = store
            .find_by_question_text("find me?")
            .await
            .expect("query")
            .expect("present");
        assert_eq!(found.id, "qa1");
    }

    #[tokio::test]
    async fn find_by_question_text_absent_is_none() {
        let store = setup().await;
        let found = store
            .find_by_question_text("nope?")
            .await
            .expect("query");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn list_recent_filters_by_source() {
        let store = setup().await;
        let mut generated = sample("qa1", "gen?");
        generated.source = Source::Generated;
        let mut ingested = sample("qa2", "ing?");
        ingested.source = Source::Ingested;
        store.create(generated).await.expect("create 1");
        store.create(ingested).await.expect("create 2");

        let only_ingested = store
            .list_recent(
                10,
                RecentFilter {
                    source: Some(Source::Ingested),
                },
            )
            .await
            .expect("list");
        assert_eq!(only_ingested.len(), 1);
        assert_eq!(only_ingested[0].id, "qa2");
    }
}
