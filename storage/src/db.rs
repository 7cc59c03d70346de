use std::ops::Deref;

use surrealdb::engine::any::{connect, Any};
use surrealdb::opt::auth::Root;
use surrealdb::{Error, Surreal};

/// Thin connection wrapper shared by the vector index (C2) and the
/// canonical store (C3) — both live in the same SurrealDB instance.
#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;
        db.signin(Root { username, password }).await?;
        db.use_ns(namespace).use_db(database).await?;
        Ok(SurrealDbClient { client: db })
    }

    /// Schema setup for cold start (C8): the HNSW vector index (fixed at
    /// dimension `D`, spec §3 invariant 4) and the unique index on the
    /// canonical store's question text that backs O(log n) dedup lookup
    /// (spec §6 persisted state layout).
    pub async fn ensure_initialized(&self, embedding_dim: usize) -> Result<(), Error> {
        self.build_indexes(embedding_dim).await
    }

    pub async fn build_indexes(&self, embedding_dim: usize) -> Result<(), Error> {
        self.client
            .query(format!(
                "DEFINE INDEX IF NOT EXISTS idx_vector_point_vector ON TABLE vector_point FIELDS vector HNSW DIMENSION {embedding_dim}"
            ))
            .await?
            .check()?;

        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_vector_point_qa_id ON TABLE vector_point FIELDS qa_id",
            )
            .await?
            .check()?;

        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_qa_pair_question ON TABLE qa_pair FIELDS question_text UNIQUE",
            )
            .await?
            .check()?;

        Ok(())
    }

    /// Recreate the HNSW index at a new dimension. Needed if the embedding
    /// provider's dimension ever changes at runtime.
    pub async fn rebuild_vector_index(&self, embedding_dim: usize) -> Result<(), Error> {
        let query = format!(
            "BEGIN TRANSACTION;
             REMOVE INDEX IF EXISTS idx_vector_point_vector ON TABLE vector_point;
             DEFINE INDEX idx_vector_point_vector ON TABLE vector_point FIELDS vector HNSW DIMENSION {embedding_dim};
             COMMIT TRANSACTION;"
        );
        self.client.query(query).await?.check()?;
        Ok(())
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// In-memory client for tests.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;
        db.use_ns(namespace).use_db(database).await?;
        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn build_indexes_is_idempotent() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.build_indexes(8).await.expect("first build");
        db.build_indexes(8).await.expect("second build");
    }
}
