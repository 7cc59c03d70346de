use std::sync::Arc;

use embedding::EmbeddingProvider;
use llm::LlmClient;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use storage::{SurrealDbClient, VectorIndex};
use tracing::{info, warn};

/// C8 operating mode. C4/C5 unavailability never drops the system below
/// `Degraded` — only C1/C2 are load-bearing (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Normal,
    Degraded,
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct HealthState {
    pub embedding_ready: bool,
    pub vector_index_ready: bool,
    pub llm_ready: bool,
    pub fetcher_ready: bool,
    pub mode: Mode,
}

impl HealthState {
    /// In `Degraded` mode the pipeline answers `vector_hit`/`vector_fallback`
    /// only and declines new admissions (spec §4.8).
    pub fn accepts_admissions(&self) -> bool {
        self.mode == Mode::Normal
    }

    /// C1/C2 are the load-bearing dependencies; a degraded/unavailable C4
    /// or C5 doesn't stop the system from being considered initialized
    /// (spec §4.8), it only narrows what `ask` can do.
    fn initialized(&self) -> bool {
        self.embedding_ready && self.vector_index_ready
    }
}

/// External shape is spec §6's `health()` contract:
/// `{initialized: bool, components: map<name, {status, detail}>}`.
/// `mode`/per-field readiness stay internal to `HealthState` for C8's own
/// admission-gating decisions; they aren't part of the wire contract.
impl Serialize for HealthState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct Component {
            status: &'static str,
            detail: &'static str,
        }

        fn component(ready: bool, ready_detail: &'static str, down_detail: &'static str) -> Component {
            Component {
                status: if ready { "healthy" } else { "unhealthy" },
                detail: if ready { ready_detail } else { down_detail },
            }
        }

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("initialized", &self.initialized())?;
        let components = [
            ("embedding", component(self.embedding_ready, "reachable", "embedding provider unreachable")),
            ("vector_index", component(self.vector_index_ready, "indexes built", "vector index unreachable")),
            ("llm", component(self.llm_ready, "reachable", "llm provider unreachable or quota exhausted")),
            ("fetcher", component(self.fetcher_ready, "configured", "fetcher not configured")),
        ];
        map.serialize_entry("components", &components.into_iter().collect::<std::collections::HashMap<_, _>>())?;
        map.end()
    }
}

/// Re-probes every dependency; called both at cold start and from the
/// `health` endpoint so a component recovering at runtime is picked up
/// without a restart.
pub async fn check_readiness(
    db: &SurrealDbClient,
    embedding: &EmbeddingProvider,
    dimension: usize,
    llm: Option<&Arc<LlmClient>>,
    fetcher_configured: bool,
) -> HealthState {
    let vector_index_ready = match db.ensure_initialized(dimension).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "vector index not ready");
            false
        }
    };

    let embedding_ready = embedding.embed("readiness probe").await.is_ok();

    let llm_ready = match llm {
        Some(client) => client.health().await.reachable,
        None => false,
    };

    let mode = if embedding_ready && vector_index_ready {
        if llm_ready && fetcher_configured {
            Mode::Normal
        } else {
            Mode::Degraded
        }
    } else {
        Mode::Unavailable
    };

    info!(?mode, embedding_ready, vector_index_ready, llm_ready, fetcher_configured, "readiness check");

    HealthState {
        embedding_ready,
        vector_index_ready,
        llm_ready,
        fetcher_ready: fetcher_configured,
        mode,
    }
}

/// Cheap liveness check used by the HTTP layer's liveness probe: confirms
/// the vector collection is still reachable without re-verifying every
/// dependency.
pub async fn check_liveness(vector_index: &VectorIndex) -> bool {
    vector_index.stats().await.connected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn degraded_when_llm_and_fetcher_absent() {
        let db = SurrealDbClient::memory("health_test", "db1").await.expect("mem db");
        let embedding = EmbeddingProvider::hashed(8);
        let state = check_readiness(&db, &embedding, 8, None, false).await;
        assert_eq!(state.mode, Mode::Degraded);
        assert!(!state.accepts_admissions());
    }
}
