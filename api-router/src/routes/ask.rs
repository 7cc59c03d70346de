use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use storage::Language;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

fn parse_language(code: Option<&str>) -> Language {
    match code {
        Some("ar") => Language::Ar,
        Some("en") => Language::En,
        _ => Language::Auto,
    }
}

/// `ask` external operation (spec §6).
pub async fn ask(State(state): State<ApiState>, Json(req): Json<AskRequest>) -> Result<impl IntoResponse, ApiError> {
    let language = parse_language(req.language.as_deref());
    let decision = state.pipeline.ask(&req.question, req.user_id, req.context, language).await?;
    Ok(Json(decision))
}
