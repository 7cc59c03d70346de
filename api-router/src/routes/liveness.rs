use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use storage::VectorIndex;

use crate::api_state::ApiState;

/// Liveness probe: cheap check that the vector index connection is still
/// reachable, without re-verifying every dependency (see `ready` for that).
pub async fn live(State(state): State<ApiState>) -> impl IntoResponse {
    let index = VectorIndex::new(state.db.clone(), state.embedding_dim);
    if qa_pipeline::check_liveness(&index).await {
        (StatusCode::OK, Json(json!({"status": "ok"})))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"status": "error"})))
    }
}
