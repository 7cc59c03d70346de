pub mod canonical_store;
pub mod db;
pub mod vector_index;

pub use canonical_store::{CanonicalStore, CanonicalStoreError, Language, QaPair, RecentFilter, Source};
pub use db::SurrealDbClient;
pub use vector_index::{PayloadFilter, ScoredHit, Stats, VectorIndex, VectorIndexError, VectorPayload};
