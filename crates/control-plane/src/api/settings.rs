// Engine settings HTTP routes

use axum::{extract::State, routing::get, Json, Router};
use hookline_core::{Settings, SettingsUpdate};

use super::common::{ApiResult, ErrorResponse};
use super::AppState;

/// Create settings routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/settings", get(get_settings).patch(update_settings))
        .with_state(state)
}

/// GET /v1/settings - Current engine settings
#[utoipa::path(
    get,
    path = "/v1/settings",
    responses(
        (status = 200, description = "Current settings", body = Settings)
    ),
    tag = "settings"
)]
pub async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.engine.settings().as_ref().clone())
}

/// PATCH /v1/settings - Update engine settings
///
/// Invalid updates are rejected as a whole; the previous settings stay in effect.
#[utoipa::path(
    patch,
    path = "/v1/settings",
    request_body = SettingsUpdate,
    responses(
        (status = 200, description = "Settings updated", body = Settings),
        (status = 400, description = "Invalid settings", body = ErrorResponse),
        (status = 500, description = "Internal server error")
    ),
    tag = "settings"
)]
pub async fn update_settings(
    State(state): State<AppState>,
    Json(req): Json<SettingsUpdate>,
) -> ApiResult<Json<Settings>> {
    let settings = state.engine.update_settings(req).await?;
    Ok(Json(settings.as_ref().clone()))
}
