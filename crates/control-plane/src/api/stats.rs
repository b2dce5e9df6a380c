// Delivery statistics HTTP routes

use axum::{extract::State, routing::get, Json, Router};
use hookline_core::StatsSummary;

use super::common::ApiResult;
use super::AppState;

/// Create stats routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/stats", get(get_stats))
        .with_state(state)
}

/// GET /v1/stats - Delivery statistics
#[utoipa::path(
    get,
    path = "/v1/stats",
    responses(
        (status = 200, description = "Current statistics", body = StatsSummary),
        (status = 500, description = "Internal server error")
    ),
    tag = "stats"
)]
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<StatsSummary>> {
    Ok(Json(state.engine.stats().await?))
}
