use api_state::ApiState;
use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use routes::{
    ask::ask, expand_variants::expand_variants, find_similar::find_similar, ingest_news::ingest_news,
    liveness::live, readiness::ready,
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for the QA service's external operations (spec §6). There is
/// no auth surface in this service — every route is public.
pub fn api_routes_v1<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/ask", post(ask))
        .route("/find_similar", post(find_similar))
        .route("/expand_variants", post(expand_variants))
        .route("/ingest_news", post(ingest_news))
}
