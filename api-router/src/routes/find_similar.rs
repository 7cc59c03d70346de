use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;

use crate::{api_state::ApiState, error::ApiError};

fn default_limit() -> usize {
    5
}

#[derive(Debug, Deserialize)]
pub struct FindSimilarRequest {
    pub question: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// `find_similar` external operation (spec §6).
pub async fn find_similar(
    State(state): State<ApiState>,
    Json(req): Json<FindSimilarRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let matches = state.pipeline.find_similar(&req.question, req.limit).await?;
    Ok(Json(matches))
}
