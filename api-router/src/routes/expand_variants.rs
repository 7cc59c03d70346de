use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ExpandVariantsRequest {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// `expand_variants` external operation (spec §6).
pub async fn expand_variants(
    State(state): State<ApiState>,
    Json(req): Json<ExpandVariantsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let variants = state.pipeline.expand_variants(&req.question, &req.answer, req.user_id).await?;
    Ok(Json(variants))
}
