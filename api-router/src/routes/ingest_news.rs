use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// `ingest_news` external operation (spec §6): manually triggers a C7
/// cycle. Returns 202 with a "skipped" body if a cycle is already running
/// (spec §4.7 drop-if-busy).
pub async fn ingest_news(State(state): State<ApiState>) -> impl IntoResponse {
    match state.news.trigger_cycle().await {
        Some(report) => (StatusCode::OK, Json(serde_json::to_value(report).unwrap_or(json!({})))),
        None => (StatusCode::ACCEPTED, Json(json!({"status": "skipped", "reason": "cycle already running"}))),
    }
}
