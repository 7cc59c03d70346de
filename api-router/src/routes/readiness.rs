use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::api_state::ApiState;

/// C8 readiness probe: re-checks every dependency and reports `Mode`.
/// Never caches a prior result (spec §4.8).
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    let health = qa_pipeline::check_readiness(
        &state.db,
        &state.embedding,
        state.embedding_dim,
        state.llm.as_ref(),
        state.fetcher_configured,
    )
    .await;

    let status = if health.mode == qa_pipeline::Mode::Unavailable {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status, Json(health))
}
