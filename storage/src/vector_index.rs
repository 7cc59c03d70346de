use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::SurrealDbClient;

const TABLE: &str = "vector_point";

/// C2 failure kinds (spec §4.2).
#[derive(Debug, Error)]
pub enum VectorIndexError {
    #[error("vector index unavailable: {0}")]
    Unavailable(String),
    #[error("vector has dimension {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("transient vector index error: {0}")]
    Transient(String),
}

impl From<surrealdb::Error> for VectorIndexError {
    fn from(err: surrealdb::Error) -> Self {
        VectorIndexError::Transient(err.to_string())
    }
}

/// Payload carried by a VectorPoint (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub qa_id: String,
    pub question_text: String,
    pub is_variant: bool,
    pub origin_qa_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub language: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorPointRow {
    id: String,
    vector: Vec<f32>,
    qa_id: String,
    question_text: String,
    is_variant: bool,
    origin_qa_id: Option<String>,
    created_at: DateTime<Utc>,
    language: String,
    user_id: Option<String>,
}

/// A hit returned by `search` (spec §3 ScoredHit).
#[derive(Debug, Clone)]
pub struct ScoredHit {
    pub qa_id: String,
    pub question_text: String,
    pub score: f32,
    pub payload: VectorPayload,
}

/// Optional predicate used by `search` and `delete_by_payload`.
#[derive(Debug, Clone, Default)]
pub struct PayloadFilter {
    pub is_variant: Option<bool>,
    pub user_id: Option<String>,
}

impl PayloadFilter {
    fn to_clause(&self, binds: &mut Vec<(&'static str, surrealdb::sql::Value)>) -> String {
        let mut clauses = Vec::new();
        if let Some(is_variant) = self.is_variant {
            clauses.push("is_variant = $f_is_variant".to_string());
            binds.push(("f_is_variant", is_variant.into()));
        }
        if let Some(user_id) = &self.user_id {
            clauses.push("user_id = $f_user_id".to_string());
            binds.push(("f_user_id", user_id.clone().into()));
        }
        if clauses.is_empty() {
            String::new()
        } else {
            format!(" AND {}", clauses.join(" AND "))
        }
    }
}

#[derive(Debug, Clone)]
pub struct Stats {
    pub points_total: usize,
    pub connected: bool,
}

/// C2 Vector Index. Cosine distance, fixed-dimension HNSW index over
/// `vector_point` (grounded in `text_chunk_embedding.rs`'s HNSW usage).
pub struct VectorIndex {
    db: Arc<SurrealDbClient>,
    dimension: usize,
}

impl VectorIndex {
    pub fn new(db: Arc<SurrealDbClient>, dimension: usize) -> Self {
        Self { db, dimension }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Idempotent on `point_id`; last writer wins.
    pub async fn upsert(
        &self,
        point_id: &str,
        vector: Vec<f32>,
        payload: VectorPayload,
    ) -> Result<(), VectorIndexError> {
        self.check_dimension(&vector)?;

        let row = VectorPointRow {
            id: point_id.to_string(),
            vector,
            qa_id: payload.qa_id,
            question_text: payload.question_text,
            is_variant: payload.is_variant,
            origin_qa_id: payload.origin_qa_id,
            created_at: payload.created_at,
            language: payload.language,
            user_id: payload.user_id,
        };

        self.db
            .client
            .upsert((TABLE, point_id))
            .content(row)
            .await?;

        Ok(())
    }

    /// Atomic at the batch level only; no ordering guarantee across calls.
    /// Each row gets uniquely-named bind variables so a single
    /// multi-statement transaction covers the whole batch (grounded in
    /// `text_chunk.rs`'s bulk-UPSERT transaction shape).
    pub async fn upsert_batch(
        &self,
        points: Vec<(String, Vec<f32>, VectorPayload)>,
    ) -> Result<(), VectorIndexError> {
        for (_, vector, _) in &points {
            self.check_dimension(vector)?;
        }
        if points.is_empty() {
            return Ok(());
        }

        let rows: Vec<(String, VectorPointRow)> = points
            .into_iter()
            .map(|(point_id, vector, payload)| {
                (
                    point_id.clone(),
                    VectorPointRow {
                        id: point_id,
                        vector,
                        qa_id: payload.qa_id,
                        question_text: payload.question_text,
                        is_variant: payload.is_variant,
                        origin_qa_id: payload.origin_qa_id,
                        created_at: payload.created_at,
                        language: payload.language,
                        user_id: payload.user_id,
                    },
                )
            })
            .collect();

        let mut sql = String::from("BEGIN TRANSACTION;");
        for i in 0..rows.len() {
            sql.push_str(&format!(
                "UPSERT type::thing($table, $id{i}) CONTENT $row{i};"
            ));
        }
        sql.push_str("COMMIT TRANSACTION;");

        let mut q = self.db.client.query(sql).bind(("table", TABLE));
        for (i, (point_id, row)) in rows.into_iter().enumerate() {
            q = q
                .bind((format!("id{i}"), point_id))
                .bind((format!("row{i}"), row));
        }

        q.await?.check()?;
        Ok(())
    }

    /// Up to `k` hits with `score >= min_score`, sorted descending by
    /// score, older insertions breaking ties first (KNN shape grounded in
    /// `text_chunk.rs::vector_search`).
    pub async fn search(
        &self,
        vector: &[f32],
        k: usize,
        min_score: f32,
        filter: Option<PayloadFilter>,
    ) -> Result<Vec<ScoredHit>, VectorIndexError> {
        self.check_dimension(vector)?;

        let mut binds: Vec<(&'static str, surrealdb::sql::Value)> = Vec::new();
        let filter_clause = filter.unwrap_or_default().to_clause(&mut binds);

        let sql = format!(
            "SELECT *, vector::similarity::cosine(vector, $embedding) AS score
             FROM {TABLE}
             WHERE vector <|{k},100|> $embedding{filter_clause}
             ORDER BY score DESC, created_at ASC
             LIMIT {k};"
        );

        let mut q = self.db.client.query(sql).bind(("embedding", vector.to_vec()));
        for (name, value) in binds {
            q = q.bind((name, value));
        }

        let rows: Vec<ScoredHitRow> = q.await?.take(0)?;

        Ok(rows
            .into_iter()
            .filter(|r| r.score >= min_score)
            .map(|r| ScoredHit {
                qa_id: r.qa_id.clone(),
                question_text: r.question_text.clone(),
                score: r.score,
                payload: VectorPayload {
                    qa_id: r.qa_id,
                    question_text: r.question_text,
                    is_variant: r.is_variant,
                    origin_qa_id: r.origin_qa_id,
                    created_at: r.created_at,
                    language: r.language,
                    user_id: r.user_id,
                },
            })
            .collect())
    }

    /// Removes all points matching `filter`.
    pub async fn delete_by_payload(&self, filter: PayloadFilter) -> Result<(), VectorIndexError> {
        let mut binds: Vec<(&'static str, surrealdb::sql::Value)> = Vec::new();
        let clause = filter.to_clause(&mut binds);
        let where_clause = clause.strip_prefix(" AND ").unwrap_or("true");

        let mut q = self
            .db
            .client
            .query(format!("DELETE FROM {TABLE} WHERE {where_clause};"));
        for (name, value) in binds {
            q = q.bind((name, value));
        }
        q.await?.check()?;
        Ok(())
    }

    pub async fn stats(&self) -> Stats {
        match self
            .db
            .client
            .query(format!("SELECT count() FROM {TABLE} GROUP ALL;"))
            .await
        {
            Ok(mut response) => {
                #[derive(Deserialize)]
                struct CountRow {
                    count: usize,
                }
                let rows: Vec<CountRow> = response.take(0).unwrap_or_default();
                Stats {
                    points_total: rows.first().map(|r| r.count).unwrap_or(0),
                    connected: true,
                }
            }
            Err(_) => Stats {
                points_total: 0,
                connected: false,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScoredHitRow {
    qa_id: String,
    question_text: String,
    score: f32,
    is_variant: bool,
    origin_qa_id: Option<String>,
    created_at: DateTime<Utc>,
    language: String,
    user_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn setup() -> Arc<SurrealDbClient> {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.build_indexes(4).await.expect("build indexes");
        Arc::new(db)
    }

    fn payload(qa_id: &str, question: &str) -> VectorPayload {
        VectorPayload {
            qa_id: qa_id.to_string(),
            question_text: question.to_string(),
            is_variant: false,
            origin_qa_id: None,
            created_at: Utc::now(),
            language: "en".to_string(),
            user_id: None,
        }
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension() {
        let db = setup().await;
        let index = VectorIndex::new(db, 4);
        let err = index
            .upsert("p1", vec![0.1, 0.2], payload("qa1", "q1"))
            .await
            .unwrap_err();
        assert!(matches!(err, VectorIndexError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn upsert_then_search_finds_point() {
        let db = setup().await;
        let index = VectorIndex::new(db, 4);
        index
            .upsert("p1", vec![1.0, 0.0, 0.0, 0.0], payload("qa1", "what is x"))
            .await
            .expect("upsert");

        let hits = index
            .search(&[1.0, 0.0, 0.0, 0.0], 5, 0.0, None)
            .await
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].qa_id, "qa1");
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_point_id() {
        let db = setup().await;
        let index = VectorIndex::new(db.clone(), 4);
        index
            .upsert("p1", vec![1.0, 0.0, 0.0, 0.0], payload("qa1", "first"))
            .await
            .expect("first upsert");
        index
            .upsert("p1", vec![1.0, 0.0, 0.0, 0.0], payload("qa1", "second"))
            .await
            .expect("second upsert");

        let hits = index
            .search(&[1.0, 0.0, 0.0, 0.0], 5, 0.0, None)
            .await
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].question_text, "second");
    }
}
